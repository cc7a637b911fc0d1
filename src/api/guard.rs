//! Guard service: motion trigger + rules + actions behind one handle.

use crate::core::actions::{ActionDispatcher, Transports};
use crate::core::capture::{CaptureSource, CaptureWorker, WorkerHandle, WorkerMessage};
use crate::core::observer::{GuardEvent, Observer};
use crate::core::rules::RuleEngine;
use crate::core::settings::{ConfigStore, Configuration, SharedConfig};
use crate::core::video::detector::{
    PIXEL_NUMBER_DIFF_THRESHOLD_MAX, PIXEL_NUMBER_DIFF_THRESHOLD_MIN,
    PIXEL_VALUE_DIFF_THRESHOLD_MAX, PIXEL_VALUE_DIFF_THRESHOLD_MIN,
};
use crate::core::GuardError;
use crossbeam_channel::Receiver;
use log::{info, warn};
use std::sync::Arc;

/// Running guard.
///
/// ```ignore
/// let (guard, events) = GuardService::start(
///     Box::new(JsonFileStore::new("guard.json")),
///     Box::new(camera),
///     Transports::with_default_http()?,
/// )?;
/// guard.set_pixel_number_diff_threshold(400)?;
/// ```
pub struct GuardService {
    store: Box<dyn ConfigStore>,
    config: SharedConfig,
    engine: Arc<RuleEngine>,
    worker: WorkerHandle,
}

impl GuardService {
    /// Loads the configuration, starts the capture worker and immediately
    /// asks it to (re)start capturing.
    pub fn start(
        store: Box<dyn ConfigStore>,
        source: Box<dyn CaptureSource>,
        transports: Transports,
    ) -> Result<(Self, Receiver<GuardEvent>), GuardError> {
        crate::init_logging();
        info!("🛡️ GuardService: starting");

        let config = SharedConfig::new(store.load()?);
        let (observer, events) = Observer::channel();
        let dispatcher = ActionDispatcher::new(transports, observer.clone())?;
        let engine = Arc::new(RuleEngine::new(config.clone(), dispatcher));
        let worker =
            CaptureWorker::new(source, config.clone(), Arc::clone(&engine), observer).spawn()?;

        worker.send(WorkerMessage::Restart);
        info!("✅ GuardService started");

        Ok((
            Self {
                store,
                config,
                engine,
                worker,
            },
            events,
        ))
    }

    pub fn configuration(&self) -> Arc<Configuration> {
        self.config.snapshot()
    }

    pub fn restart(&self) {
        self.worker.send(WorkerMessage::Restart);
    }

    pub fn stop_capture(&self) {
        self.worker.send(WorkerMessage::Stop);
    }

    /// Persists the new value and applies it to the running detector. Both
    /// setters clamp to the detector's bounds before storing.
    pub fn set_pixel_value_diff_threshold(&self, threshold: u8) -> Result<(), GuardError> {
        let threshold =
            threshold.clamp(PIXEL_VALUE_DIFF_THRESHOLD_MIN, PIXEL_VALUE_DIFF_THRESHOLD_MAX);
        self.update(|c| c.triggers.motion.pixel_value_diff_threshold = threshold as u32)?;
        self.worker
            .send(WorkerMessage::SetPixelValueDiffThreshold(threshold));
        Ok(())
    }

    pub fn set_pixel_number_diff_threshold(&self, threshold: u32) -> Result<(), GuardError> {
        let threshold =
            threshold.clamp(PIXEL_NUMBER_DIFF_THRESHOLD_MIN, PIXEL_NUMBER_DIFF_THRESHOLD_MAX);
        self.update(|c| c.triggers.motion.pixel_number_diff_threshold = threshold)?;
        self.worker
            .send(WorkerMessage::SetPixelNumberDiffThreshold(threshold));
        Ok(())
    }

    /// Takes effect at the next capture start.
    pub fn set_preview_surface(&self, surface: Option<String>) {
        self.worker.send(WorkerMessage::SetPreviewSurface(surface));
    }

    /// Re-reads the store and restarts capture with the new document.
    pub fn reload_configuration(&self) -> Result<(), GuardError> {
        let config = self.store.load()?;
        self.config.replace(config);
        info!("🔄 Configuration reloaded");
        self.worker.send(WorkerMessage::Restart);
        Ok(())
    }

    pub fn cancel_rule(&self, rule_id: &str) -> usize {
        self.engine.cancel_rule(rule_id)
    }

    fn update(&self, edit: impl FnOnce(&mut Configuration)) -> Result<(), GuardError> {
        let mut config = (*self.config.snapshot()).clone();
        edit(&mut config);
        if let Err(e) = self.store.save(&config) {
            warn!("⚠️ Cannot persist configuration: {}", e);
            return Err(e.into());
        }
        self.config.replace(config);
        Ok(())
    }
}

impl Drop for GuardService {
    fn drop(&mut self) {
        self.worker.shutdown();
        self.engine.cancel_all();
        info!("🗑️ GuardService: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actions::RecordingTransport;
    use crate::core::capture::{CaptureError, CaptureEvents, CaptureTargets, SourceDescriptor};
    use crate::core::settings::{HttpAction, MemoryStore, Rule};
    use crate::core::video::{RawFrame, Resolution};
    use crate::core::observer::DispatchOutcome;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorded {
        opens: usize,
        closes: usize,
        surface: Option<String>,
        events: Option<CaptureEvents>,
    }

    #[derive(Clone, Default)]
    struct FakeCamera {
        state: Arc<Mutex<Recorded>>,
    }

    impl CaptureSource for FakeCamera {
        fn list_sources(&self) -> Result<Vec<SourceDescriptor>, CaptureError> {
            Ok(vec![SourceDescriptor {
                id: "back".into(),
                is_front: false,
                is_back: true,
                available_resolutions: vec![Resolution::new(16, 16), Resolution::new(8, 8)],
            }])
        }

        fn open(
            &mut self,
            _id: &str,
            targets: &CaptureTargets,
            events: CaptureEvents,
        ) -> Result<(), CaptureError> {
            let mut state = self.state.lock();
            state.opens += 1;
            state.surface = targets.preview_surface.clone();
            state.events = Some(events);
            Ok(())
        }

        fn close(&mut self) {
            let mut state = self.state.lock();
            state.closes += 1;
            if let Some(events) = state.events.take() {
                events.closed();
            }
        }
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn config() -> Configuration {
        let mut config = Configuration::default();
        config.triggers.motion.camera_id = "back".into();
        config.actions.http = vec![HttpAction {
            id: "home".into(),
            url: "http://127.0.0.1:9/".into(),
            method: "POST".into(),
            headers: vec![],
        }];
        config.rules = vec![Rule {
            id: "r1".into(),
            trigger: "MOTION".into(),
            action: "HTTP:home".into(),
            cooldown_ms: 60_000,
            include_payload: true,
            ..Default::default()
        }];
        config
    }

    #[test]
    fn test_start_opens_the_selected_source() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera.clone()),
            Transports::empty(),
        )
        .unwrap();

        wait_until("open", || camera.state.lock().opens == 1);
        drop(guard);
        assert_eq!(camera.state.lock().closes, 1);
    }

    #[test]
    fn test_motion_end_to_end() {
        let camera = FakeCamera::default();
        let recorder = Arc::new(RecordingTransport::default());
        let (guard, events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera.clone()),
            Transports::empty().with_http(recorder.clone()),
        )
        .unwrap();
        wait_until("open", || camera.state.lock().events.is_some());

        let sink = camera.state.lock().events.clone().unwrap();
        sink.frame(RawFrame::from_luma(16, 16, vec![0; 256], 1));
        sink.frame(RawFrame::from_luma(16, 16, vec![255; 256], 2));

        let outcome = loop {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                GuardEvent::Dispatch { outcome, .. } => break outcome,
                GuardEvent::DiffPixels { .. } => {}
            }
        };
        assert_eq!(outcome, DispatchOutcome::Completed);

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "image/jpeg");
        drop(sent);
        drop(guard);
    }

    #[test]
    fn test_thresholds_are_persisted() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera),
            Transports::empty(),
        )
        .unwrap();

        guard.set_pixel_value_diff_threshold(42).unwrap();
        guard.set_pixel_number_diff_threshold(1234).unwrap();

        let motion = &guard.configuration().triggers.motion;
        assert_eq!(motion.pixel_value_diff_threshold, 42);
        assert_eq!(motion.pixel_number_diff_threshold, 1234);

        let stored = guard.store.load().unwrap();
        assert_eq!(stored.triggers.motion.pixel_number_diff_threshold, 1234);
    }

    #[test]
    fn test_out_of_range_thresholds_are_stored_clamped() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera),
            Transports::empty(),
        )
        .unwrap();

        guard.set_pixel_value_diff_threshold(0).unwrap();
        guard.set_pixel_number_diff_threshold(5_000_000).unwrap();

        let stored = guard.store.load().unwrap();
        assert_eq!(stored.triggers.motion.pixel_value_diff_threshold, 1);
        assert_eq!(stored.triggers.motion.pixel_number_diff_threshold, 100_000);
        assert!(stored.validate().is_empty());
        assert_eq!(*guard.configuration(), stored);
    }

    #[test]
    fn test_preview_surface_used_on_restart() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera.clone()),
            Transports::empty(),
        )
        .unwrap();
        wait_until("open", || camera.state.lock().opens == 1);

        guard.set_preview_surface(Some("view-1".into()));
        guard.restart();
        wait_until("reopen", || camera.state.lock().opens == 2);
        assert_eq!(camera.state.lock().surface.as_deref(), Some("view-1"));
    }

    #[test]
    fn test_reload_configuration_restarts_capture() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera.clone()),
            Transports::empty(),
        )
        .unwrap();
        wait_until("open", || camera.state.lock().opens == 1);

        let mut edited = config();
        edited.rules.clear();
        guard.store.save(&edited).unwrap();
        guard.reload_configuration().unwrap();

        wait_until("reopen", || camera.state.lock().opens == 2);
        assert!(guard.configuration().rules.is_empty());
    }

    #[test]
    fn test_stop_capture_closes_source() {
        let camera = FakeCamera::default();
        let (guard, _events) = GuardService::start(
            Box::new(MemoryStore::new(config())),
            Box::new(camera.clone()),
            Transports::empty(),
        )
        .unwrap();
        wait_until("open", || camera.state.lock().opens == 1);

        guard.stop_capture();
        wait_until("close", || camera.state.lock().closes == 1);
        drop(guard);
        // Already idle: shutdown does not close again.
        assert_eq!(camera.state.lock().closes, 1);
    }
}
