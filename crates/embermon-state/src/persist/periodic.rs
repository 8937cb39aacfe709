use async_trait::async_trait;
use embermon_storage::InstanceStore;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::persist::{states_to_rows, StatePersister};

/// Async-periodic (global) strategy: on every tick, replace the entire
/// persisted snapshot with the current cache. A crash between ticks can
/// lose the most recent transitions; the final flush on shutdown is the
/// only durability guarantee this mode gives.
pub struct AsyncStatePersister {
    store: Arc<dyn InstanceStore>,
    flush_interval_secs: u64,
}

impl AsyncStatePersister {
    pub fn new(store: Arc<dyn InstanceStore>, flush_interval_secs: u64) -> Self {
        Self {
            store,
            flush_interval_secs: flush_interval_secs.max(1),
        }
    }

    async fn flush(&self, cache: &Cache) {
        // snapshot first; the cache lock must not be held across I/O
        let states = cache.snapshot();
        let rows = states_to_rows(&states);
        let count = rows.len();
        match self.store.replace_all_instances(rows).await {
            Ok(()) => tracing::debug!(instances = count, "Flushed state snapshot"),
            Err(e) => tracing::error!(error = %e, "Failed to flush state snapshot"),
        }
    }
}

#[async_trait]
impl StatePersister for AsyncStatePersister {
    async fn run_async(&self, cancel: CancellationToken, cache: &Cache) {
        tracing::info!(
            interval_secs = self.flush_interval_secs,
            "State persister started"
        );
        let mut tick = interval(Duration::from_secs(self.flush_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.flush(cache).await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("State persister stopping, performing final flush");
                    self.flush(cache).await;
                    return;
                }
            }
        }
    }
}

/// Async-periodic (per-rule) strategy: like [`AsyncStatePersister`], but
/// each tick replaces rows rule by rule, so one failing rule does not
/// roll back the others.
pub struct AsyncRulePersister {
    store: Arc<dyn InstanceStore>,
    flush_interval_secs: u64,
}

impl AsyncRulePersister {
    pub fn new(store: Arc<dyn InstanceStore>, flush_interval_secs: u64) -> Self {
        Self {
            store,
            flush_interval_secs: flush_interval_secs.max(1),
        }
    }

    async fn flush(&self, cache: &Cache) {
        for key in cache.rule_keys() {
            let states = cache.get_states_for_rule(key.org_id, &key.uid);
            let rows = states_to_rows(&states);
            let count = rows.len();
            match self.store.replace_rule_instances(&key, rows).await {
                Ok(()) => {
                    tracing::debug!(rule_uid = %key.uid, instances = count,
                        "Flushed rule state snapshot")
                }
                Err(e) => {
                    tracing::error!(rule_uid = %key.uid, error = %e,
                        "Failed to flush rule state snapshot")
                }
            }
        }
    }
}

#[async_trait]
impl StatePersister for AsyncRulePersister {
    async fn run_async(&self, cancel: CancellationToken, cache: &Cache) {
        tracing::info!(
            interval_secs = self.flush_interval_secs,
            "Per-rule state persister started"
        );
        let mut tick = interval(Duration::from_secs(self.flush_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.flush(cache).await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Per-rule state persister stopping, performing final flush");
                    self.flush(cache).await;
                    return;
                }
            }
        }
    }
}
