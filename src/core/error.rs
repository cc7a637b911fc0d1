use crate::core::actions::{DeliveryError, DispatchError};
use crate::core::capture::CaptureError;
use crate::core::settings::ConfigError;
use crate::core::video::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
