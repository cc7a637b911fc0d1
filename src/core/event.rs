//! Detection events flowing from triggers to the rule engine.

use chrono::{DateTime, Utc};
use image::{ImageOutputFormat, RgbImage};
use log::warn;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// JPEG quality used when a snapshot leaves the process.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 100;

/// Category of stimulus a rule can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Motion,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Motion => "MOTION",
        }
    }

    /// Content type of the payload this trigger produces.
    pub fn payload_media_type(&self) -> &'static str {
        match self {
            TriggerKind::Motion => "image/jpeg",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MOTION" => Ok(TriggerKind::Motion),
            other => Err(format!("unknown trigger \"{}\"", other)),
        }
    }
}

/// Preview picture attached to an event. The JPEG encoding is done at most
/// once, on first use, and shared by every action of the event.
pub struct Snapshot {
    image: RgbImage,
    jpeg: OnceCell<Option<Vec<u8>>>,
}

impl Snapshot {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            jpeg: OnceCell::new(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn jpeg_bytes(&self) -> Option<&[u8]> {
        self.jpeg
            .get_or_init(|| {
                let mut buffer = Cursor::new(Vec::new());
                match self
                    .image
                    .write_to(&mut buffer, ImageOutputFormat::Jpeg(SNAPSHOT_JPEG_QUALITY))
                {
                    Ok(()) => Some(buffer.into_inner()),
                    Err(e) => {
                        warn!("Could not encode snapshot to JPEG: {}", e);
                        None
                    }
                }
            })
            .as_deref()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("encoded", &self.jpeg.get().is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub trigger: TriggerKind,
    pub payload: Option<Arc<Snapshot>>,
    /// Monotonic detection time.
    pub detected_at: Instant,
    /// Wall clock time, used to name uploaded objects.
    pub captured_at: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn new(trigger: TriggerKind, payload: Option<Snapshot>) -> Self {
        Self {
            trigger,
            payload: payload.map(Arc::new),
            detected_at: Instant::now(),
            captured_at: Utc::now(),
        }
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_ref().and_then(|s| s.jpeg_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_parse_is_case_insensitive() {
        assert_eq!("motion".parse::<TriggerKind>(), Ok(TriggerKind::Motion));
        assert_eq!(" MOTION ".parse::<TriggerKind>(), Ok(TriggerKind::Motion));
        assert!("sound".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_snapshot_jpeg_is_cached() {
        let snapshot = Snapshot::new(RgbImage::new(32, 24));
        let first = snapshot.jpeg_bytes().unwrap().as_ptr();
        let second = snapshot.jpeg_bytes().unwrap().as_ptr();

        assert_eq!(first, second);
        assert_eq!(&snapshot.jpeg_bytes().unwrap()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_event_without_payload() {
        let event = DetectionEvent::new(TriggerKind::Motion, None);
        assert!(event.payload_bytes().is_none());
    }
}
