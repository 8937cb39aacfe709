use async_trait::async_trait;
use embermon_common::types::RuleKey;
use embermon_storage::InstanceStore;
use std::sync::Arc;

use crate::persist::{state_to_row, StatePersister};
use crate::state::StateTransition;

/// Rule-batched synchronous strategy: one per-rule replace call per
/// round, carrying only that round's non-stale transitions. Stale rows
/// disappear as a side effect of the replace.
pub struct SyncRulePersister {
    store: Arc<dyn InstanceStore>,
}

impl SyncRulePersister {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatePersister for SyncRulePersister {
    async fn sync(&self, key: &RuleKey, transitions: &[StateTransition]) {
        let mut rows = Vec::with_capacity(transitions.len());
        for transition in transitions.iter().filter(|tr| !tr.stale()) {
            match state_to_row(&transition.state) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(rule_uid = %key.uid, error = %e,
                        "Skipping transition without a persistable identity");
                }
            }
        }

        let count = rows.len();
        match self.store.replace_rule_instances(key, rows).await {
            Ok(()) => {
                tracing::debug!(rule_uid = %key.uid, instances = count,
                    "Persisted rule round")
            }
            Err(e) => {
                tracing::error!(rule_uid = %key.uid, error = %e,
                    "Failed to persist rule round")
            }
        }
    }
}
