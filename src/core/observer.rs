//! Status channel for the outside world: per-frame diff counts and
//! per-attempt dispatch outcomes.

use crossbeam_channel::{unbounded, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered, or failed in a way retrying cannot fix.
    Completed,
    /// Transient failure, another attempt is scheduled.
    Retrying,
    /// Transient failure and no retries left.
    GaveUp,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// `-1` means the frame had no reference to compare against.
    DiffPixels { diff_pixels: i64 },
    Dispatch {
        rule_id: String,
        attempt: u32,
        outcome: DispatchOutcome,
    },
}

#[derive(Clone, Default)]
pub struct Observer {
    sender: Option<Sender<GuardEvent>>,
}

impl Observer {
    pub fn channel() -> (Self, Receiver<GuardEvent>) {
        let (tx, rx) = unbounded();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn diff_pixels(&self, diff_pixels: i64) {
        self.emit(GuardEvent::DiffPixels { diff_pixels });
    }

    pub fn dispatch(&self, rule_id: &str, attempt: u32, outcome: DispatchOutcome) {
        self.emit(GuardEvent::Dispatch {
            rule_id: rule_id.to_string(),
            attempt,
            outcome,
        });
    }

    fn emit(&self, event: GuardEvent) {
        if let Some(sender) = &self.sender {
            // Nobody listening is fine.
            let _ = sender.send(event);
        }
    }
}
