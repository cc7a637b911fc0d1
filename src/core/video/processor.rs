//! Raw frame → blurred grayscale processing chain.

use super::frame::{luma, FrameError, RawFrame, Resolution};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

/// Pixel count the preview resolution is matched against (720p).
pub const HD_TARGET_PIXELS: u64 = 1280 * 720;

/// Gaussian sigma of the low-pass filter applied before diffing.
pub const BLUR_SIGMA: f32 = 2.0;

/// Smallest advertised resolution, to bound per-frame CPU cost.
pub fn select_processing_resolution(available: &[Resolution]) -> Option<Resolution> {
    let mut lowest: Option<Resolution> = None;
    for res in available {
        match lowest {
            Some(current) if res.pixel_count() >= current.pixel_count() => {}
            _ => lowest = Some(*res),
        }
    }
    lowest
}

/// Advertised resolution whose pixel count is closest to [`HD_TARGET_PIXELS`].
pub fn select_preview_resolution(available: &[Resolution]) -> Option<Resolution> {
    let mut best: Option<(Resolution, u64)> = None;
    for res in available {
        let diff = res.pixel_count().abs_diff(HD_TARGET_PIXELS);
        match best {
            Some((_, best_diff)) if diff >= best_diff => {}
            _ => best = Some((*res, diff)),
        }
    }
    best.map(|(res, _)| res)
}

/// Output of one processing cycle.
pub struct ProcessedFrame {
    /// Full resolution RGB copy, used as the action payload.
    pub preview: RgbImage,
    /// Grayscale, downscaled and blurred, used for diffing.
    pub processed: GrayImage,
}

pub struct FrameProcessor {
    preview: Resolution,
    processing: Resolution,
    blur_sigma: f32,
}

impl FrameProcessor {
    pub fn new(preview: Resolution, processing: Resolution) -> Self {
        Self {
            preview,
            processing,
            blur_sigma: BLUR_SIGMA,
        }
    }

    pub fn with_blur_sigma(mut self, sigma: f32) -> Self {
        self.blur_sigma = sigma;
        self
    }

    pub fn preview_resolution(&self) -> Resolution {
        self.preview
    }

    pub fn processing_resolution(&self) -> Resolution {
        self.processing
    }

    pub fn process(&self, frame: &RawFrame) -> Result<ProcessedFrame, FrameError> {
        if frame.resolution() != self.preview {
            return Err(FrameError::Geometry(format!(
                "frame is {}, processor expects {}",
                frame.resolution(),
                self.preview
            )));
        }

        let preview = frame.to_rgb()?;
        let resized = self.downscale(&preview);
        let gray = Self::to_grayscale(&resized);
        let processed = self.blur(gray);

        Ok(ProcessedFrame { preview, processed })
    }

    fn downscale(&self, rgb: &RgbImage) -> RgbImage {
        if rgb.dimensions() == (self.processing.width, self.processing.height) {
            return rgb.clone();
        }

        imageops::resize(
            rgb,
            self.processing.width,
            self.processing.height,
            FilterType::CatmullRom,
        )
    }

    fn to_grayscale(rgb: &RgbImage) -> GrayImage {
        let mut gray = GrayImage::new(rgb.width(), rgb.height());
        for (src, dst) in rgb.pixels().zip(gray.pixels_mut()) {
            *dst = Luma([luma(src.0[0], src.0[1], src.0[2])]);
        }
        gray
    }

    fn blur(&self, gray: GrayImage) -> GrayImage {
        if self.blur_sigma <= 0.0 {
            return gray;
        }
        imageops::blur(&gray, self.blur_sigma)
    }
}
