use planner_common::throttle::memory::InMemoryStore;
use planner_common::throttle::ThrottleStore;

use actix_web::rt::task::JoinHandle;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Deletes records with no attempt within `retention` from the in-memory store every
/// `frequency`, leaving records under an active block.
pub fn spawn_stale_record_pruning(
    store: Arc<InMemoryStore>,
    retention: Duration,
    frequency: Duration,
) -> JoinHandle<()> {
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(frequency);

        loop {
            interval.tick().await;

            let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
                continue;
            };

            match store.delete_stale(cutoff) {
                Ok(0) => (),
                Ok(count) => log::info!("Pruned {count} stale throttle records from memory"),
                Err(e) => log::error!("Failed to prune stale throttle records: {e}"),
            }
        }
    })
}
