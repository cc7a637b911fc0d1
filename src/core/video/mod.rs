pub mod detector;
pub mod frame;
pub mod processor;

pub use detector::{FrameOutcome, MotionDetector, NO_REFERENCE};
pub use frame::{FrameError, RawFrame, Resolution};
pub use processor::{
    select_preview_resolution, select_processing_resolution, FrameProcessor, ProcessedFrame,
};
