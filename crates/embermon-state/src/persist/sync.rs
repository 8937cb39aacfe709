use async_trait::async_trait;
use embermon_common::types::RuleKey;
use embermon_storage::InstanceStore;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::persist::{state_to_row, StatePersister};
use crate::state::StateTransition;

/// Sync-immediate strategy: after every round, delete the round's stale
/// transitions and upsert the rest, fanned out over a bounded pool.
pub struct SyncStatePersister {
    store: Arc<dyn InstanceStore>,
    max_concurrency: usize,
}

impl SyncStatePersister {
    pub fn new(store: Arc<dyn InstanceStore>, max_concurrency: usize) -> Self {
        Self {
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }
}

#[async_trait]
impl StatePersister for SyncStatePersister {
    async fn sync(&self, key: &RuleKey, transitions: &[StateTransition]) {
        let stale_hashes: Vec<String> = transitions
            .iter()
            .filter(|tr| tr.stale())
            .map(|tr| tr.state.cache_id.to_string())
            .collect();

        if !stale_hashes.is_empty() {
            match self.store.delete_instances(key, &stale_hashes).await {
                Ok(removed) => {
                    tracing::debug!(rule_uid = %key.uid, removed, "Deleted stale alert instances")
                }
                Err(e) => {
                    tracing::error!(rule_uid = %key.uid, error = %e,
                        "Failed to delete stale alert instances")
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::new();

        for transition in transitions.iter().filter(|tr| !tr.stale()) {
            let row = match state_to_row(&transition.state) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(rule_uid = %key.uid, error = %e,
                        "Skipping transition without a persistable identity");
                    continue;
                }
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // the semaphore is never closed; bail out of the round if it is
                Err(_) => return,
            };
            let store = self.store.clone();
            let uid = key.uid.clone();

            handles.push(tokio::spawn(async move {
                if let Err(e) = store.upsert_instance(row).await {
                    tracing::error!(rule_uid = %uid, error = %e,
                        "Failed to upsert alert instance");
                }
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(rule_uid = %key.uid, error = %e, "Instance upsert task panicked");
            }
        }
    }
}
