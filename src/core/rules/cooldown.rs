use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-rule "not before" instants. Entries live for the engine's lifetime.
#[derive(Default)]
pub struct CooldownTable {
    not_before: Mutex<HashMap<String, u64>>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set under one lock: two concurrent events for the same rule
    /// inside one cooldown window cannot both pass.
    pub fn try_acquire(&self, rule_id: &str, now_ms: u64, cooldown_ms: u64) -> bool {
        let mut table = self.not_before.lock();
        if let Some(&not_before) = table.get(rule_id) {
            if now_ms < not_before {
                return false;
            }
        }
        table.insert(rule_id.to_string(), now_ms.saturating_add(cooldown_ms));
        true
    }

    pub fn not_before(&self, rule_id: &str) -> Option<u64> {
        self.not_before.lock().get(rule_id).copied()
    }

    pub fn clear(&self) {
        self.not_before.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_window_is_half_open() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("r1", 1_000, 500));
        assert!(!table.try_acquire("r1", 1_499, 500));
        assert!(table.try_acquire("r1", 1_500, 500));
        assert_eq!(table.not_before("r1"), Some(2_000));
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("r1", 10, 0));
        assert!(table.try_acquire("r1", 10, 0));
    }

    #[test]
    fn test_rules_are_independent() {
        let table = CooldownTable::new();
        assert!(table.try_acquire("r1", 0, 10_000));
        assert!(table.try_acquire("r2", 1, 10_000));
        assert!(!table.try_acquire("r1", 2, 10_000));
    }

    #[test]
    fn test_concurrent_acquire_admits_one() {
        let table = Arc::new(CooldownTable::new());
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    if table.try_acquire("r1", 42, 60_000) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
