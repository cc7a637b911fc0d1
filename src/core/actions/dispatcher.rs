//! Asynchronous action delivery with bounded, delayed retries.

use super::scheduler::RetryScheduler;
use super::transport::Transports;
use crate::core::event::DetectionEvent;
use crate::core::observer::{DispatchOutcome, Observer};
use crate::core::settings::ActionSpec;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("cannot build dispatch pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("cannot start retry scheduler: {0}")]
    Scheduler(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub retry_delay: Duration,
}

/// One rule firing: an action to perform for an event.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub rule_id: String,
    pub action: ActionSpec,
    pub event: Arc<DetectionEvent>,
    pub include_payload: bool,
    pub policy: RetryPolicy,
}

struct ChainState {
    rule_id: String,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Handle on the attempts of one dispatch. Cancelling it only stops this
/// chain; an attempt already running is allowed to finish.
#[derive(Clone)]
pub struct RetryHandle {
    chain: Arc<ChainState>,
}

impl RetryHandle {
    pub fn rule_id(&self) -> &str {
        &self.chain.rule_id
    }

    pub fn cancel(&self) {
        self.chain.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.chain.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.chain.finished.load(Ordering::SeqCst)
    }
}

struct Inner {
    pool: ThreadPool,
    scheduler: RetryScheduler,
    transports: Transports,
    observer: Observer,
    chains: Mutex<HashMap<String, Vec<Arc<ChainState>>>>,
}

pub struct ActionDispatcher {
    inner: Arc<Inner>,
}

impl ActionDispatcher {
    /// Pool sized to the available parallelism.
    pub fn new(transports: Transports, observer: Observer) -> Result<Self, DispatchError> {
        Self::with_threads(num_cpus::get(), transports, observer)
    }

    pub fn with_threads(
        threads: usize,
        transports: Transports,
        observer: Observer,
    ) -> Result<Self, DispatchError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("guard-dispatch-{}", i))
            .build()?;
        let scheduler = RetryScheduler::new()?;

        info!("🚀 ActionDispatcher: {} worker thread(s)", threads.max(1));
        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                scheduler,
                transports,
                observer,
                chains: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Runs `f` on the dispatch pool.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.pool.spawn(f);
    }

    /// Starts the first attempt of `job` off the calling thread.
    pub fn dispatch(&self, job: DispatchJob) -> RetryHandle {
        let chain = Arc::new(ChainState {
            rule_id: job.rule_id.clone(),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        {
            let mut chains = self.inner.chains.lock();
            let entry = chains.entry(job.rule_id.clone()).or_default();
            entry.retain(|c| !c.finished.load(Ordering::SeqCst));
            entry.push(Arc::clone(&chain));
        }

        let handle = RetryHandle {
            chain: Arc::clone(&chain),
        };
        let inner = Arc::clone(&self.inner);
        let job = Arc::new(job);
        self.inner
            .pool
            .spawn(move || run_attempt(&inner, job, chain, 1));

        handle
    }

    /// Cancels every in-flight chain of one rule.
    pub fn cancel_rule(&self, rule_id: &str) -> usize {
        let removed = self.inner.chains.lock().remove(rule_id).unwrap_or_default();
        let mut cancelled = 0;
        for chain in removed {
            if !chain.finished.load(Ordering::SeqCst) {
                chain.cancelled.store(true, Ordering::SeqCst);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("Cancelled {} retry chain(s) of rule \"{}\"", cancelled, rule_id);
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        let all: Vec<_> = self.inner.chains.lock().drain().collect();
        for (_, chains) in all {
            for chain in chains {
                chain.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn in_flight(&self, rule_id: &str) -> usize {
        self.inner
            .chains
            .lock()
            .get(rule_id)
            .map(|c| {
                c.iter()
                    .filter(|c| !c.finished.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        self.cancel_all();
        info!("🗑️ ActionDispatcher: released");
    }
}

fn finish(inner: &Inner, chain: &Arc<ChainState>) {
    chain.finished.store(true, Ordering::SeqCst);
    let mut chains = inner.chains.lock();
    if let Some(list) = chains.get_mut(&chain.rule_id) {
        list.retain(|c| !Arc::ptr_eq(c, chain));
        if list.is_empty() {
            chains.remove(&chain.rule_id);
        }
    }
}

fn run_attempt(inner: &Arc<Inner>, job: Arc<DispatchJob>, chain: Arc<ChainState>, attempt: u32) {
    if chain.cancelled.load(Ordering::SeqCst) {
        debug!("Rule \"{}\" chain cancelled before attempt {}", job.rule_id, attempt);
        inner
            .observer
            .dispatch(&job.rule_id, attempt, DispatchOutcome::Cancelled);
        finish(inner, &chain);
        return;
    }

    let done = job
        .action
        .perform(&inner.transports, &job.event, job.include_payload);

    if done {
        inner
            .observer
            .dispatch(&job.rule_id, attempt, DispatchOutcome::Completed);
        finish(inner, &chain);
        return;
    }

    if attempt > job.policy.retries {
        warn!(
            "Rule \"{}\": {}:{} failed after {} attempt(s), giving up",
            job.rule_id,
            job.action.kind().as_str(),
            job.action.id(),
            attempt
        );
        inner
            .observer
            .dispatch(&job.rule_id, attempt, DispatchOutcome::GaveUp);
        finish(inner, &chain);
        return;
    }

    debug!(
        "Rule \"{}\": attempt {} failed, retrying in {:?}",
        job.rule_id, attempt, job.policy.retry_delay
    );
    inner
        .observer
        .dispatch(&job.rule_id, attempt, DispatchOutcome::Retrying);

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let due = Instant::now() + job.policy.retry_delay;
    inner.scheduler.schedule(
        due,
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let pool_inner = Arc::clone(&inner);
            inner
                .pool
                .spawn(move || run_attempt(&pool_inner, job, chain, attempt + 1));
        }),
    );
}
