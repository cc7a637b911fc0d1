//! Boundary to whatever produces frames (a camera HAL, a file, a test fake).

use super::worker::WorkerMessage;
use crate::core::video::{RawFrame, Resolution};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, warn};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no capture source selected")]
    NoSourceSelected,
    #[error("capture source \"{0}\" not found")]
    SourceNotFound(String),
    #[error("capture source \"{0}\" has no usable resolution")]
    NoResolution(String),
    #[error("capture source busy: {0}")]
    Busy(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture source failure: {0}")]
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub id: String,
    pub is_front: bool,
    pub is_back: bool,
    pub available_resolutions: Vec<Resolution>,
}

/// Streams requested from a source when it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTargets {
    pub preview: Resolution,
    pub processing: Resolution,
    /// Opaque handle of a display surface, forwarded as-is.
    pub preview_surface: Option<String>,
}

/// Handed to a source on open. Frames are delivered without blocking the
/// producer; when the worker falls behind they are dropped. Close
/// notifications go through the control queue and are never dropped.
#[derive(Clone)]
pub struct CaptureEvents {
    frames: Sender<WorkerMessage>,
    control: Sender<WorkerMessage>,
}

impl CaptureEvents {
    pub(crate) fn new(frames: Sender<WorkerMessage>, control: Sender<WorkerMessage>) -> Self {
        Self { frames, control }
    }

    /// Returns `false` when the frame was dropped.
    pub fn frame(&self, frame: RawFrame) -> bool {
        match self.frames.try_send(WorkerMessage::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(WorkerMessage::Frame(f))) => {
                debug!("Worker queue full, dropping frame #{}", f.frame_number);
                false
            }
            Err(_) => false,
        }
    }

    /// The source finished closing (requested or not).
    pub fn closed(&self) {
        if self.control.send(WorkerMessage::SourceClosed).is_err() {
            warn!("Capture worker is gone, close notification lost");
        }
    }
}

pub trait CaptureSource: Send {
    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, CaptureError>;

    /// Starts streaming. Frames and the eventual close notification go
    /// through `events`.
    fn open(
        &mut self,
        id: &str,
        targets: &CaptureTargets,
        events: CaptureEvents,
    ) -> Result<(), CaptureError>;

    /// Requests a close; completion is signalled with [`CaptureEvents::closed`].
    fn close(&mut self);
}
