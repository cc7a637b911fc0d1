use super::frame::{FrameError, RawFrame};
use super::processor::FrameProcessor;
use crate::core::event::{DetectionEvent, Snapshot, TriggerKind};
use image::{GrayImage, RgbImage};
use log::{debug, warn};

pub const PIXEL_VALUE_DIFF_THRESHOLD_MIN: u8 = 1;
pub const PIXEL_VALUE_DIFF_THRESHOLD_MAX: u8 = 255;
pub const PIXEL_NUMBER_DIFF_THRESHOLD_MIN: u32 = 1;
// Even a high resolution camera is unlikely to need more than this.
pub const PIXEL_NUMBER_DIFF_THRESHOLD_MAX: u32 = 100_000;

/// Diff count reported for a frame that had nothing to compare against.
pub const NO_REFERENCE: i64 = -1;

#[derive(Debug)]
pub struct FrameOutcome {
    pub diff_pixels: i64,
    pub event: Option<DetectionEvent>,
}

/// Thresholded frame difference against the previous processed frame.
pub struct MotionDetector {
    processor: Option<FrameProcessor>,
    reference: Option<GrayImage>,
    pixel_value_diff_threshold: u8,
    pixel_number_diff_threshold: u32,
}

impl MotionDetector {
    pub fn new(pixel_value_diff_threshold: u8, pixel_number_diff_threshold: u32) -> Self {
        let mut detector = Self {
            processor: None,
            reference: None,
            pixel_value_diff_threshold: PIXEL_VALUE_DIFF_THRESHOLD_MIN,
            pixel_number_diff_threshold: PIXEL_NUMBER_DIFF_THRESHOLD_MIN,
        };
        detector.set_pixel_value_diff_threshold(pixel_value_diff_threshold);
        detector.set_pixel_number_diff_threshold(pixel_number_diff_threshold);
        detector
    }

    /// Installs the processor for a new capture and forgets the old reference.
    pub fn configure(&mut self, processor: FrameProcessor) {
        self.processor = Some(processor);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn pixel_value_diff_threshold(&self) -> u8 {
        self.pixel_value_diff_threshold
    }

    pub fn pixel_number_diff_threshold(&self) -> u32 {
        self.pixel_number_diff_threshold
    }

    pub fn set_pixel_value_diff_threshold(&mut self, threshold: u8) {
        let clamped = threshold.max(PIXEL_VALUE_DIFF_THRESHOLD_MIN);
        if clamped != threshold {
            warn!(
                "pixel value diff threshold {} out of range, using {}",
                threshold, clamped
            );
        }
        self.pixel_value_diff_threshold = clamped;
    }

    pub fn set_pixel_number_diff_threshold(&mut self, threshold: u32) {
        let clamped =
            threshold.clamp(PIXEL_NUMBER_DIFF_THRESHOLD_MIN, PIXEL_NUMBER_DIFF_THRESHOLD_MAX);
        if clamped != threshold {
            warn!(
                "pixel number diff threshold {} out of range, using {}",
                threshold, clamped
            );
        }
        self.pixel_number_diff_threshold = clamped;
    }

    pub fn on_frame(&mut self, frame: &RawFrame) -> Result<FrameOutcome, FrameError> {
        let processor = self.processor.as_ref().ok_or_else(|| {
            FrameError::Geometry("no processor configured for this capture".to_string())
        })?;
        let out = processor.process(frame)?;
        Ok(self.evaluate(out.processed, out.preview))
    }

    /// Compares an already processed frame with the reference and rolls the
    /// reference forward.
    pub fn evaluate(&mut self, processed: GrayImage, preview: RgbImage) -> FrameOutcome {
        let diff = match self.reference.take() {
            Some(reference) if reference.dimensions() == processed.dimensions() => {
                count_diff_pixels(&processed, &reference, self.pixel_value_diff_threshold)
            }
            stale => {
                if stale.is_some() {
                    debug!("Reference geometry changed, starting over");
                }
                self.reference = Some(processed);
                return FrameOutcome {
                    diff_pixels: NO_REFERENCE,
                    event: None,
                };
            }
        };

        // Swap in the current frame; the old reference buffer is dropped.
        self.reference = Some(processed);

        let event = if diff >= self.pixel_number_diff_threshold as u64 {
            debug!("MOTION DETECTED ({} pixels)", diff);
            Some(DetectionEvent::new(
                TriggerKind::Motion,
                Some(Snapshot::new(preview)),
            ))
        } else {
            None
        };

        FrameOutcome {
            diff_pixels: diff as i64,
            event,
        }
    }
}

/// Number of positions whose luma moved by at least `threshold`.
pub fn count_diff_pixels(current: &GrayImage, reference: &GrayImage, threshold: u8) -> u64 {
    current
        .as_raw()
        .iter()
        .zip(reference.as_raw().iter())
        .filter(|(a, b)| a.abs_diff(**b) >= threshold)
        .count() as u64
}
