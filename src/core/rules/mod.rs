//! Rule matching, cooldowns and hand-off to the action dispatcher.

mod clock;
mod cooldown;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use cooldown::CooldownTable;

use crate::core::actions::{ActionDispatcher, DispatchJob, RetryHandle, RetryPolicy};
use crate::core::event::{DetectionEvent, TriggerKind};
use crate::core::settings::SharedConfig;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct RuleEngine {
    config: SharedConfig,
    cooldowns: CooldownTable,
    dispatcher: ActionDispatcher,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    pub fn new(config: SharedConfig, dispatcher: ActionDispatcher) -> Self {
        Self::with_clock(config, dispatcher, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: SharedConfig,
        dispatcher: ActionDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cooldowns: CooldownTable::new(),
            dispatcher,
            clock,
        }
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    /// Runs [`RuleEngine::dispatch`] on the dispatch pool so the caller
    /// never waits on rule evaluation.
    pub fn submit(self: &Arc<Self>, event: DetectionEvent) {
        let engine = Arc::clone(self);
        let event = Arc::new(event);
        self.dispatcher.execute(move || {
            engine.dispatch(&event);
        });
    }

    /// Fires every rule bound to the event's trigger whose action resolves
    /// and whose cooldown has elapsed. Returns one handle per started chain.
    pub fn dispatch(&self, event: &Arc<DetectionEvent>) -> Vec<RetryHandle> {
        let config = self.config.snapshot();
        let now = self.clock.now_ms();
        let mut handles = Vec::new();

        for rule in &config.rules {
            match rule.trigger.parse::<TriggerKind>() {
                Ok(trigger) if trigger == event.trigger => {}
                Ok(_) => continue,
                Err(_) => {
                    debug!(
                        "Rule \"{}\" has unknown trigger \"{}\", skipping",
                        rule.id, rule.trigger
                    );
                    continue;
                }
            }

            let action = match config.resolve_str(&rule.action) {
                Ok(action) => action,
                Err(e) => {
                    warn!("Rule \"{}\": {}, skipping", rule.id, e);
                    continue;
                }
            };

            // Cooldown starts when the rule fires, whatever the delivery outcome.
            if !self.cooldowns.try_acquire(&rule.id, now, rule.cooldown_ms) {
                debug!("Rule \"{}\" is cooling down, skipping", rule.id);
                continue;
            }

            info!(
                "🔔 Rule \"{}\" fired: {} -> {}",
                rule.id, event.trigger, rule.action
            );
            handles.push(self.dispatcher.dispatch(DispatchJob {
                rule_id: rule.id.clone(),
                action,
                event: Arc::clone(event),
                include_payload: rule.include_payload,
                policy: RetryPolicy {
                    retries: rule.retries,
                    retry_delay: Duration::from_millis(rule.retry_delay_ms),
                },
            }));
        }

        handles
    }

    pub fn cancel_rule(&self, rule_id: &str) -> usize {
        self.dispatcher.cancel_rule(rule_id)
    }

    pub fn cancel_all(&self) {
        self.dispatcher.cancel_all();
    }
}
