mod dispatcher;
mod perform;
mod scheduler;
mod transport;

pub use dispatcher::{ActionDispatcher, DispatchError, DispatchJob, RetryHandle, RetryPolicy};
pub use perform::{alert_text, s3_object_key};
pub use scheduler::{Job, RetryScheduler};
pub use transport::{Delivered, Delivery, DeliveryError, ReqwestTransport, Transport, Transports};

#[cfg(test)]
pub(crate) use perform::tests::RecordingTransport;
