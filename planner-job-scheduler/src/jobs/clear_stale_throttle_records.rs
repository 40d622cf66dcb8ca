use planner_common::throttle::ThrottleStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::jobs::{Job, JobError};

pub struct ClearStaleThrottleRecordsJob {
    pub retention: Duration,

    throttle_store: Arc<dyn ThrottleStore>,
    is_running: bool,
}

impl ClearStaleThrottleRecordsJob {
    pub fn new(retention: Duration, throttle_store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            retention,
            throttle_store,
            is_running: false,
        }
    }
}

#[async_trait]
impl Job for ClearStaleThrottleRecordsJob {
    fn name(&self) -> &'static str {
        "Clear Stale Throttle Records"
    }

    fn is_ready(&self) -> bool {
        !self.is_running
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        self.is_running = true;

        let cutoff = SystemTime::now() - self.retention;
        let throttle_store = Arc::clone(&self.throttle_store);

        let result = tokio::task::spawn_blocking(move || throttle_store.delete_stale(cutoff)).await;

        self.is_running = false;

        let deleted_count = result??;
        log::info!("Deleted {deleted_count} stale throttle records");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use planner_common::throttle::memory::InMemoryStore;
    use planner_common::throttle::{
        IdentifierKind, IpThrottle, SpamPrevention, ThrottleKey, ThrottleNamespace,
    };

    const DAY: Duration = Duration::from_secs(86400);

    #[tokio::test]
    async fn test_clears_only_stale_unblocked_records() {
        let store = Arc::new(InMemoryStore::new());
        let ip_throttle = IpThrottle::with_defaults(store.clone());
        let spam_prevention = SpamPrevention::with_defaults(store.clone());

        let long_ago = SystemTime::now() - DAY * 30;

        // Stale, not blocked
        ip_throttle.record_failed_attempt("1.2.3.4").unwrap();
        let stale_key = ThrottleKey::new(ThrottleNamespace::IpThrottle, None, "1.2.3.4");
        store.set_last_attempt(&stale_key, long_ago);

        // Recent, not blocked
        ip_throttle.record_failed_attempt("5.6.7.8").unwrap();

        // Stale, but blocked with no expiry
        for _ in 0..5 {
            spam_prevention
                .record_attempt("a@b.com", IdentifierKind::Email)
                .unwrap();
        }
        let blocked_key = ThrottleKey::new(
            ThrottleNamespace::SpamPrevention,
            Some(IdentifierKind::Email),
            "a@b.com",
        );
        store.set_last_attempt(&blocked_key, long_ago);
        store.set_blocked_until(&blocked_key, None);

        // Stale, with a block that ran out long ago
        for _ in 0..5 {
            spam_prevention
                .record_attempt("10.0.0.1", IdentifierKind::Ip)
                .unwrap();
        }
        let expired_key = ThrottleKey::new(
            ThrottleNamespace::SpamPrevention,
            Some(IdentifierKind::Ip),
            "10.0.0.1",
        );
        store.set_last_attempt(&expired_key, long_ago);
        store.set_blocked_until(&expired_key, Some(long_ago));

        assert_eq!(store.len(), 4);

        let mut job = ClearStaleThrottleRecordsJob::new(DAY * 7, store.clone());
        assert!(job.is_ready());
        job.execute().await.unwrap();
        assert!(job.is_ready());

        assert_eq!(store.len(), 2);
        assert!(store.get(&stale_key).is_none());
        assert!(store.get(&expired_key).is_none());
        assert!(store.get(&blocked_key).is_some());
        assert_eq!(ip_throttle.get_attempt_count("5.6.7.8").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(InMemoryStore::new());
        let mut job = ClearStaleThrottleRecordsJob::new(DAY, store.clone());

        job.execute().await.unwrap();
        assert!(store.is_empty());
    }
}
