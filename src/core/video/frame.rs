use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame geometry mismatch: {0}")]
    Geometry(String),
}

/// Frame size advertised by a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// Raw sensor frame in planar YUV 4:2:0, as delivered by the capture source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub y_plane: Vec<u8>,
    pub u_plane: Vec<u8>,
    pub v_plane: Vec<u8>,
    pub timestamp_ms: u64,
    pub frame_number: u64,
}

impl RawFrame {
    /// Builds a frame whose chroma is neutral, i.e. a pure grayscale picture.
    pub fn from_luma(width: u32, height: u32, y_plane: Vec<u8>, frame_number: u64) -> Self {
        let chroma_len = Self::chroma_len(width, height);
        Self {
            width,
            height,
            y_plane,
            u_plane: vec![128; chroma_len],
            v_plane: vec![128; chroma_len],
            timestamp_ms: frame_number * 33,
            frame_number,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    fn chroma_width(width: u32) -> usize {
        width.div_ceil(2) as usize
    }

    fn chroma_len(width: u32, height: u32) -> usize {
        Self::chroma_width(width) * height.div_ceil(2) as usize
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Geometry(format!(
                "empty frame {} x {}",
                self.width, self.height
            )));
        }

        let luma_len = self.width as usize * self.height as usize;
        if self.y_plane.len() != luma_len {
            return Err(FrameError::Geometry(format!(
                "Y plane has {} bytes, expected {}",
                self.y_plane.len(),
                luma_len
            )));
        }

        let chroma_len = Self::chroma_len(self.width, self.height);
        if self.u_plane.len() != chroma_len || self.v_plane.len() != chroma_len {
            return Err(FrameError::Geometry(format!(
                "U/V planes have {}/{} bytes, expected {}",
                self.u_plane.len(),
                self.v_plane.len(),
                chroma_len
            )));
        }

        Ok(())
    }

    /// BT.601 full-range YUV → RGB.
    pub fn to_rgb(&self) -> Result<RgbImage, FrameError> {
        self.validate()?;

        let chroma_width = Self::chroma_width(self.width);
        let mut rgb = RgbImage::new(self.width, self.height);

        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let y_idx = (y * self.width + x) as usize;
            let uv_idx = (y / 2) as usize * chroma_width + (x / 2) as usize;

            let y_val = self.y_plane[y_idx] as f32;
            let u_val = self.u_plane[uv_idx] as f32 - 128.0;
            let v_val = self.v_plane[uv_idx] as f32 - 128.0;

            let r = (y_val + 1.402 * v_val).round().clamp(0.0, 255.0) as u8;
            let g = (y_val - 0.344136 * u_val - 0.714136 * v_val)
                .round()
                .clamp(0.0, 255.0) as u8;
            let b = (y_val + 1.772 * u_val).round().clamp(0.0, 255.0) as u8;

            *pixel = Rgb([r, g, b]);
        }

        Ok(rgb)
    }
}

/// Rec.601 luma, integer weights.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_chroma_keeps_luma() {
        let frame = RawFrame::from_luma(64, 48, vec![128u8; 64 * 48], 1);
        let rgb = frame.to_rgb().unwrap();

        assert_eq!(rgb.width(), 64);
        assert_eq!(rgb.height(), 48);
        assert!(rgb.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let frame = RawFrame::from_luma(5, 3, vec![10u8; 15], 0);
        assert_eq!(frame.u_plane.len(), 3 * 2);
        assert!(frame.validate().is_ok());
        assert!(frame.to_rgb().is_ok());
    }

    #[test]
    fn test_truncated_plane_is_rejected() {
        let mut frame = RawFrame::from_luma(16, 16, vec![0u8; 16 * 16], 0);
        frame.y_plane.truncate(100);

        assert!(matches!(frame.validate(), Err(FrameError::Geometry(_))));
        assert!(frame.to_rgb().is_err());
    }

    #[test]
    fn test_red_chroma() {
        let mut frame = RawFrame::from_luma(2, 2, vec![76u8; 4], 0);
        frame.u_plane = vec![85];
        frame.v_plane = vec![255];

        let rgb = frame.to_rgb().unwrap();
        let px = rgb.get_pixel(0, 0);
        assert!(px.0[0] > 240);
        assert!(px.0[1] < 10);
        assert!(px.0[2] < 10);
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 149);
        assert_eq!(luma(0, 0, 255), 29);
    }
}
