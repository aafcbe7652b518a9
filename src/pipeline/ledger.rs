use dashmap::DashMap;

use super::Channel;
use crate::models::MessageMetadata;

// ============================================================================
// Retry Ledger
// ============================================================================
//
// The attempt count of a delivery is always read from its metadata; the
// ledger only mirrors it for orders that are currently between attempts, for
// operators and logs. Entries disappear once an order succeeds or is
// dead-lettered. DashMap shards by key, so unrelated orders never contend.
//
// ============================================================================

#[derive(Default)]
pub struct RetryLedger {
    attempts: DashMap<String, u32>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts already made for a delivery on `channel`. Primary deliveries
    /// are always first attempts.
    pub fn attempts_from(channel: Channel, metadata: &MessageMetadata) -> u32 {
        match channel {
            Channel::Primary => 0,
            Channel::Retry | Channel::DeadLetter => metadata.retry_count(),
        }
    }

    pub fn record(&self, order_id: &str, attempts: u32) {
        self.attempts.insert(order_id.to_string(), attempts);
    }

    pub fn clear(&self, order_id: &str) -> Option<u32> {
        self.attempts.remove(order_id).map(|(_, attempts)| attempts)
    }

    pub fn attempts(&self, order_id: &str) -> Option<u32> {
        self.attempts.get(order_id).map(|entry| *entry)
    }

    pub fn in_flight(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_primary_channel_ignores_metadata() {
        let metadata = MessageMetadata::new().with_retry_count(2);
        assert_eq!(RetryLedger::attempts_from(Channel::Primary, &metadata), 0);
        assert_eq!(RetryLedger::attempts_from(Channel::Retry, &metadata), 2);
    }

    #[test]
    fn test_retry_channel_without_metadata_is_first_attempt() {
        assert_eq!(RetryLedger::attempts_from(Channel::Retry, &MessageMetadata::new()), 0);
    }

    #[test]
    fn test_record_and_clear() {
        let ledger = RetryLedger::new();
        ledger.record("ORD-1", 1);
        ledger.record("ORD-1", 2);

        assert_eq!(ledger.attempts("ORD-1"), Some(2));
        assert_eq!(ledger.clear("ORD-1"), Some(2));
        assert_eq!(ledger.attempts("ORD-1"), None);
        assert_eq!(ledger.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_keys_do_not_interfere() {
        let ledger = Arc::new(RetryLedger::new());

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let ledger = ledger.clone();
                scope.spawn(move || {
                    for i in 0..250 {
                        let key = format!("ORD-{worker}-{i}");
                        ledger.record(&key, 1);
                        if i % 2 == 0 {
                            ledger.clear(&key);
                        }
                    }
                });
            }
        });

        assert_eq!(ledger.in_flight(), 8 * 125);
    }
}
