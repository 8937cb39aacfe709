//! Durable storage for alert-rule instance state.
//!
//! One row per (org, rule UID, label fingerprint). The default
//! implementation ([`store::StateStore`]) uses SeaORM over SQLite (WAL
//! mode) or PostgreSQL, selected by connection URL. The in-memory state
//! cache is the source of truth between flushes; this layer only has to
//! make restarts and store migrations survivable.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use embermon_common::types::RuleKey;
use std::collections::HashMap;

use crate::error::Result;

/// One persisted alert instance, decoded from its table row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertInstanceRow {
    pub rule_org_id: i64,
    pub rule_uid: String,
    pub labels: HashMap<String, String>,
    pub labels_hash: String,
    pub current_state: String,
    pub current_reason: Option<String>,
    pub current_state_since: DateTime<Utc>,
    pub current_state_end: DateTime<Utc>,
    pub last_eval_time: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub result_fingerprint: Option<String>,
}

/// Scope for listing persisted instances: a whole org, or one rule.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub rule_org_id: i64,
    pub rule_uid: Option<String>,
}

impl InstanceQuery {
    pub fn org(org_id: i64) -> Self {
        Self {
            rule_org_id: org_id,
            rule_uid: None,
        }
    }

    pub fn rule(key: &RuleKey) -> Self {
        Self {
            rule_org_id: key.org_id,
            rule_uid: Some(key.uid.clone()),
        }
    }
}

/// Read side of the instance store, used for cold-start warm-loads and
/// migration-time reconciliation between two stores.
#[async_trait]
pub trait InstanceReader: Send + Sync {
    async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<AlertInstanceRow>>;

    /// Org ids that currently have persisted instances.
    async fn list_org_ids_with_instances(&self) -> Result<Vec<i64>>;
}

/// Full persistence contract consumed by the state persisters.
///
/// Implementations must be safe to share across evaluation rounds
/// (`Send + Sync`); the persisters call in from concurrent rule rounds
/// and from the background flush task.
#[async_trait]
pub trait InstanceStore: InstanceReader {
    /// Inserts the row, or updates it in place when the
    /// (org, rule, labels-hash) key already exists.
    async fn upsert_instance(&self, row: AlertInstanceRow) -> Result<()>;

    /// Deletes the rule's instances with the given label hashes.
    /// Returns the number of rows removed.
    async fn delete_instances(&self, key: &RuleKey, labels_hashes: &[String]) -> Result<u64>;

    /// Deletes every instance of the rule. Returns the number of rows
    /// removed.
    async fn delete_rule_instances(&self, key: &RuleKey) -> Result<u64>;

    /// Replaces the entire persisted snapshot with `rows`, atomically.
    async fn replace_all_instances(&self, rows: Vec<AlertInstanceRow>) -> Result<()>;

    /// Replaces the rule's persisted rows with `rows`, atomically.
    async fn replace_rule_instances(
        &self,
        key: &RuleKey,
        rows: Vec<AlertInstanceRow>,
    ) -> Result<()>;

    /// Rule UIDs that currently have persisted instances in the org.
    async fn list_rule_uids_with_instances(&self, org_id: i64) -> Result<Vec<String>>;
}
