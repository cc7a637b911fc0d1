mod session;
mod source;
mod worker;

pub use session::{CaptureSession, SessionAction, SessionCommand, SessionState};
pub use source::{CaptureError, CaptureEvents, CaptureSource, CaptureTargets, SourceDescriptor};
pub use worker::{CaptureWorker, WorkerHandle, WorkerMessage, FRAME_QUEUE_CAPACITY};
