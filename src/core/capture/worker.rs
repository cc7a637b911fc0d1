//! The capture thread: owns the session state machine and the motion
//! detector, and is the only place either is touched.

use super::session::{CaptureSession, SessionAction, SessionCommand, SessionState};
use super::source::{CaptureError, CaptureEvents, CaptureSource, CaptureTargets};
use crate::core::observer::Observer;
use crate::core::rules::RuleEngine;
use crate::core::settings::SharedConfig;
use crate::core::video::{
    select_preview_resolution, select_processing_resolution, FrameProcessor, MotionDetector,
    RawFrame,
};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Frames waiting for the detector. Anything beyond is dropped at the source.
pub const FRAME_QUEUE_CAPACITY: usize = 8;

#[derive(Debug)]
pub enum WorkerMessage {
    Start,
    Stop,
    Restart,
    SetPixelValueDiffThreshold(u8),
    SetPixelNumberDiffThreshold(u32),
    SetPreviewSurface(Option<String>),
    Frame(RawFrame),
    SourceClosed,
    Shutdown,
}

pub struct CaptureWorker {
    session: CaptureSession,
    detector: MotionDetector,
    source: Box<dyn CaptureSource>,
    config: SharedConfig,
    engine: Arc<RuleEngine>,
    observer: Observer,
    preview_surface: Option<String>,
    control_tx: Sender<WorkerMessage>,
    control_rx: Receiver<WorkerMessage>,
    frames_tx: Sender<WorkerMessage>,
    frames_rx: Receiver<WorkerMessage>,
}

impl CaptureWorker {
    pub fn new(
        source: Box<dyn CaptureSource>,
        config: SharedConfig,
        engine: Arc<RuleEngine>,
        observer: Observer,
    ) -> Self {
        let motion = config.snapshot().triggers.motion.clone();
        let (control_tx, control_rx) = unbounded();
        let (frames_tx, frames_rx) = bounded(FRAME_QUEUE_CAPACITY);

        Self {
            session: CaptureSession::new(),
            detector: MotionDetector::new(
                motion.pixel_value_diff_threshold_u8(),
                motion.pixel_number_diff_threshold,
            ),
            source,
            config,
            engine,
            observer,
            preview_surface: None,
            control_tx,
            control_rx,
            frames_tx,
            frames_rx,
        }
    }

    /// Sender for control messages. Never blocks.
    pub fn control(&self) -> Sender<WorkerMessage> {
        self.control_tx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }

    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let control = self.control();
        let join = thread::Builder::new()
            .name("motion-trigger".to_string())
            .spawn(move || self.run())?;

        Ok(WorkerHandle {
            control,
            join: Some(join),
        })
    }

    fn run(mut self) {
        info!("🎥 Capture worker started");
        loop {
            // Control messages go first so a flood of frames cannot delay a stop.
            let message = match self.control_rx.try_recv() {
                Ok(m) => m,
                Err(_) => select! {
                    recv(self.control_rx) -> m => match m {
                        Ok(m) => m,
                        Err(_) => break,
                    },
                    recv(self.frames_rx) -> m => match m {
                        Ok(m) => m,
                        Err(_) => break,
                    },
                },
            };
            if !self.handle_message(message) {
                break;
            }
        }
        info!("🗑️ Capture worker: stopped");
    }

    /// Applies one message. Returns `false` once the worker should exit.
    pub fn handle_message(&mut self, message: WorkerMessage) -> bool {
        match message {
            WorkerMessage::Start => self.apply(SessionCommand::Start),
            WorkerMessage::Stop => self.apply(SessionCommand::Stop),
            WorkerMessage::Restart => self.apply(SessionCommand::Restart),
            WorkerMessage::SourceClosed => {
                // Nothing the closed source produced may reach the next session.
                self.discard_pending_frames();
                self.apply(SessionCommand::SourceClosed)
            }
            WorkerMessage::SetPixelValueDiffThreshold(t) => {
                self.detector.set_pixel_value_diff_threshold(t)
            }
            WorkerMessage::SetPixelNumberDiffThreshold(t) => {
                self.detector.set_pixel_number_diff_threshold(t)
            }
            WorkerMessage::SetPreviewSurface(surface) => {
                debug!("Preview surface set to {:?}, used from next start", surface);
                self.preview_surface = surface;
            }
            WorkerMessage::Frame(frame) => self.on_frame(frame),
            WorkerMessage::Shutdown => {
                if self.session.state() == SessionState::Capturing {
                    self.source.close();
                }
                return false;
            }
        }
        true
    }

    fn apply(&mut self, command: SessionCommand) {
        match self.session.apply(command) {
            SessionAction::OpenSource => {
                if let Err(e) = self.open_source() {
                    error!("❌ Cannot start capture: {}", e);
                    self.session.open_failed();
                }
            }
            SessionAction::CloseSource => {
                info!("Closing capture source...");
                self.source.close();
                self.discard_pending_frames();
            }
            SessionAction::None => {}
            SessionAction::Ignore(reason) => debug!("{:?} ignored: {}", command, reason),
        }
    }

    fn discard_pending_frames(&mut self) {
        let stale = self.frames_rx.try_iter().count();
        if stale > 0 {
            debug!("Discarded {} frame(s) from the previous capture", stale);
        }
    }

    fn open_source(&mut self) -> Result<(), CaptureError> {
        let config = self.config.snapshot();
        let motion = &config.triggers.motion;
        if motion.camera_id.is_empty() {
            return Err(CaptureError::NoSourceSelected);
        }

        let sources = self.source.list_sources()?;
        let descriptor = sources
            .iter()
            .find(|s| s.id == motion.camera_id)
            .ok_or_else(|| CaptureError::SourceNotFound(motion.camera_id.clone()))?;

        let resolutions = &descriptor.available_resolutions;
        let (preview, processing) = match (
            select_preview_resolution(resolutions),
            select_processing_resolution(resolutions),
        ) {
            (Some(p), Some(q)) => (p, q),
            _ => return Err(CaptureError::NoResolution(descriptor.id.clone())),
        };

        self.detector
            .set_pixel_value_diff_threshold(motion.pixel_value_diff_threshold_u8());
        self.detector
            .set_pixel_number_diff_threshold(motion.pixel_number_diff_threshold);
        self.detector
            .configure(FrameProcessor::new(preview, processing));

        let targets = CaptureTargets {
            preview,
            processing,
            preview_surface: self.preview_surface.clone(),
        };
        info!(
            "📷 Opening source \"{}\" (preview {}, processing {})",
            descriptor.id, preview, processing
        );
        self.source.open(
            &descriptor.id,
            &targets,
            CaptureEvents::new(self.frames_tx.clone(), self.control_tx.clone()),
        )
    }

    fn on_frame(&mut self, frame: RawFrame) {
        if self.session.state() != SessionState::Capturing {
            debug!(
                "Discarding frame #{} in state {:?}",
                frame.frame_number,
                self.session.state()
            );
            return;
        }

        match self.detector.on_frame(&frame) {
            Ok(outcome) => {
                self.observer.diff_pixels(outcome.diff_pixels);
                if let Some(event) = outcome.event {
                    info!(
                        "🚨 Motion on frame #{} ({} pixels)",
                        frame.frame_number, outcome.diff_pixels
                    );
                    self.engine.submit(event);
                }
            }
            Err(e) => error!("Dropping frame #{}: {}", frame.frame_number, e),
        }
    }
}

/// Owner side of a spawned worker.
pub struct WorkerHandle {
    control: Sender<WorkerMessage>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, message: WorkerMessage) {
        if self.control.send(message).is_err() {
            warn!("Capture worker is gone, message dropped");
        }
    }

    /// Asks the worker to exit and waits for it.
    pub fn shutdown(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.control.send(WorkerMessage::Shutdown);
            if join.join().is_err() {
                error!("Capture worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
