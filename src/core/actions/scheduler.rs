//! Delayed job runner backing action retries.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule(Instant, Job),
    Shutdown,
}

struct Scheduled {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap, we want the earliest job on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Runs jobs on its own thread once their due time has passed. Jobs are
/// expected to be short: they hand the real work to a pool.
pub struct RetryScheduler {
    sender: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Command>();

        let handle = thread::Builder::new()
            .name("guard-retry-scheduler".to_string())
            .spawn(move || {
                let mut queue: BinaryHeap<Scheduled> = BinaryHeap::new();
                let mut seq = 0u64;

                loop {
                    let command = match queue.peek() {
                        Some(next) => {
                            let now = Instant::now();
                            if next.due <= now {
                                if let Some(ready) = queue.pop() {
                                    (ready.job)();
                                }
                                continue;
                            }
                            match receiver.recv_timeout(next.due - now) {
                                Ok(command) => command,
                                Err(RecvTimeoutError::Timeout) => continue,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match receiver.recv() {
                            Ok(command) => command,
                            Err(_) => break,
                        },
                    };

                    match command {
                        Command::Schedule(due, job) => {
                            seq += 1;
                            queue.push(Scheduled { due, seq, job });
                        }
                        Command::Shutdown => break,
                    }
                }

                if !queue.is_empty() {
                    warn!("Retry scheduler stopped with {} pending job(s)", queue.len());
                }
                debug!("Retry scheduler thread exiting");
            })?;

        info!("⏱️ RetryScheduler: started");
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    pub fn schedule(&self, due: Instant, job: Job) {
        if self.sender.send(Command::Schedule(due, job)).is_err() {
            warn!("Retry scheduler is gone, dropping job");
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            // The last owner may be a job running on the scheduler thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("🗑️ RetryScheduler: released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_due_order() {
        let scheduler = RetryScheduler::new().unwrap();
        let (tx, rx) = bounded(3);
        let now = Instant::now();

        for (delay, tag) in [(60u64, "c"), (20, "a"), (40, "b")] {
            let tx = tx.clone();
            scheduler.schedule(
                now + Duration::from_millis(delay),
                Box::new(move || {
                    let _ = tx.send((tag, Instant::now()));
                }),
            );
        }

        let order: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            order.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert!(order[0].1 >= now + Duration::from_millis(20));
    }

    #[test]
    fn test_drop_discards_pending_jobs() {
        let scheduler = RetryScheduler::new().unwrap();
        let (tx, rx) = bounded::<()>(1);
        scheduler.schedule(
            Instant::now() + Duration::from_secs(30),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        drop(scheduler);

        // The job (and its sender) were dropped without running.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
