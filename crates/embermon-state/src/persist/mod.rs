//! Pluggable persistence strategies for evaluated state.
//!
//! All strategies share one contract: [`StatePersister::sync`] runs
//! inline after a rule's round, [`StatePersister::run_async`] is a
//! long-lived background task. A deployment selects exactly one variant
//! from configuration; the unused side of the contract is a no-op.
//! Persistence failure is never fatal: strategies log and continue, and
//! the next cycle retries naturally.

pub mod batch;
pub mod periodic;
pub mod sync;

use async_trait::async_trait;
use embermon_common::types::RuleKey;
use embermon_storage::{AlertInstanceRow, InstanceStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::error::StateError;
use crate::state::{State, StateTransition};

pub use batch::SyncRulePersister;
pub use periodic::{AsyncRulePersister, AsyncStatePersister};
pub use sync::SyncStatePersister;

/// Durability discipline shared by all strategies.
///
/// Implementations must snapshot the cache before touching storage and
/// never hold the cache lock across I/O.
#[async_trait]
pub trait StatePersister: Send + Sync {
    /// Background persistence task; runs until `cancel` fires and must
    /// complete any final flush before returning.
    async fn run_async(&self, _cancel: CancellationToken, _cache: &Cache) {}

    /// Inline persistence of one rule round's transitions.
    async fn sync(&self, _key: &RuleKey, _transitions: &[StateTransition]) {}
}

/// Which strategy a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersisterKind {
    /// Delete-stale-then-upsert after every round.
    #[default]
    Sync,
    /// Replace the whole persisted snapshot on a timer.
    AsyncGlobal,
    /// Replace rows per rule on a timer.
    AsyncRule,
    /// Replace the rule's rows once per round.
    SyncRule,
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersisterConfig {
    #[serde(default)]
    pub kind: PersisterKind,
    /// Tick interval for the async variants.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Upsert fan-out bound for the sync variant.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            kind: PersisterKind::default(),
            flush_interval_secs: default_flush_interval_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Builds the configured strategy. The selection happens once, at
/// startup; nothing downstream inspects the concrete type again.
pub fn build_persister(
    config: &PersisterConfig,
    store: Arc<dyn InstanceStore>,
) -> Box<dyn StatePersister> {
    match config.kind {
        PersisterKind::Sync => Box::new(SyncStatePersister::new(store, config.max_concurrency)),
        PersisterKind::AsyncGlobal => {
            Box::new(AsyncStatePersister::new(store, config.flush_interval_secs))
        }
        PersisterKind::AsyncRule => {
            Box::new(AsyncRulePersister::new(store, config.flush_interval_secs))
        }
        PersisterKind::SyncRule => Box::new(SyncRulePersister::new(store)),
    }
}

/// Converts a cached state into its storage row.
///
/// Fails only when the state has no rule identity; such transitions are
/// logged and skipped by the strategies, never aborting a batch.
pub fn state_to_row(state: &State) -> Result<AlertInstanceRow, StateError> {
    if state.alert_rule_uid.is_empty() {
        return Err(StateError::MissingIdentity);
    }
    Ok(AlertInstanceRow {
        rule_org_id: state.org_id,
        rule_uid: state.alert_rule_uid.clone(),
        labels: state.labels.clone(),
        labels_hash: state.cache_id.to_string(),
        current_state: state.state.to_string(),
        current_reason: state.state_reason.clone(),
        current_state_since: state.starts_at,
        current_state_end: state.ends_at,
        last_eval_time: state.last_evaluation_time,
        last_sent_at: state.last_sent_at,
        resolved_at: state.resolved_at,
        result_fingerprint: Some(state.result_fingerprint.to_string()),
    })
}

/// Converts states to rows, logging and dropping the malformed ones.
pub(crate) fn states_to_rows(states: &[State]) -> Vec<AlertInstanceRow> {
    let mut rows = Vec::with_capacity(states.len());
    for state in states {
        match state_to_row(state) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(org_id = state.org_id, error = %e,
                    "Skipping state without a persistable identity");
            }
        }
    }
    rows
}
