use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::db::DaoError;
use crate::models::throttle_record::ThrottleRecord;
use crate::throttle::{ThrottleKey, ThrottleStore};

/// A `ThrottleStore` that keeps records in process memory. State is lost on restart and is not
/// shared between server instances, so this is only suitable for tests and local development.
///
/// Records are never removed on their own. Long-running owners must call `delete_stale`
/// periodically or the map grows with every identifier seen.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<ThrottleKey, ThrottleRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ThrottleKey) -> Option<ThrottleRecord> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Overwrites the expiry of an existing record, e.g. to simulate elapsed time.
    pub fn set_blocked_until(&self, key: &ThrottleKey, blocked_until: Option<SystemTime>) {
        if let Some(record) = self.lock().get_mut(key) {
            record.blocked_until = blocked_until;
        }
    }

    /// Overwrites the last attempt time of an existing record.
    pub fn set_last_attempt(&self, key: &ThrottleKey, last_attempt: SystemTime) {
        if let Some(record) = self.lock().get_mut(key) {
            record.last_attempt = last_attempt;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ThrottleKey, ThrottleRecord>> {
        // Every mutation leaves the map consistent, so a poisoned lock is still usable
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_record(key: &ThrottleKey, attempts: i32, now: SystemTime) -> ThrottleRecord {
    let (namespace, identifier_kind, identifier) = key.db_columns();

    ThrottleRecord {
        namespace,
        identifier_kind,
        identifier: String::from(identifier),
        attempts,
        last_attempt: now,
        blocked: false,
        blocked_until: None,
    }
}

impl ThrottleStore for InMemoryStore {
    fn find(&self, key: &ThrottleKey) -> Result<Option<ThrottleRecord>, DaoError> {
        Ok(self.get(key))
    }

    fn record_failure(
        &self,
        key: &ThrottleKey,
        max_attempts: i32,
        block_until: SystemTime,
        now: SystemTime,
    ) -> Result<ThrottleRecord, DaoError> {
        let mut records = self.lock();

        let record = records
            .entry(key.clone())
            .and_modify(|r| {
                r.attempts = r.attempts.saturating_add(1);
                r.last_attempt = now;
            })
            .or_insert_with(|| new_record(key, 1, now));

        if record.attempts >= max_attempts {
            record.blocked = true;
            record.blocked_until = Some(block_until);
        }

        Ok(record.clone())
    }

    fn reset(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError> {
        self.lock()
            .entry(key.clone())
            .and_modify(|r| {
                r.attempts = 0;
                r.blocked = false;
                r.blocked_until = None;
            })
            .or_insert_with(|| new_record(key, 0, now));

        Ok(())
    }

    fn lift_block(&self, key: &ThrottleKey, now: SystemTime) -> Result<(), DaoError> {
        let mut records = self.lock();

        let Some(record) = records.get_mut(key) else {
            return Ok(());
        };

        if record.blocked && record.blocked_until.is_some_and(|until| until < now) {
            record.attempts = 0;
            record.blocked = false;
            record.blocked_until = None;
        }

        Ok(())
    }

    fn delete_stale(&self, cutoff: SystemTime) -> Result<usize, DaoError> {
        let mut records = self.lock();
        let before = records.len();

        records.retain(|_, r| {
            let is_stale = r.last_attempt < cutoff;
            let is_block_active =
                r.blocked && r.blocked_until.map_or(true, |until| until >= cutoff);
            !is_stale || is_block_active
        });

        Ok(before - records.len())
    }
}
