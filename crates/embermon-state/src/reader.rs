//! Reading persisted instances back into cache states.
//!
//! Two concerns live here: converting a stored row into a [`State`] for
//! cold-start warm-loads, and [`MultiInstanceReader`], which reconciles
//! two instance stores while both are authoritative during a storage
//! migration.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use embermon_common::types::AlertRule;
use embermon_storage::error::Result as StorageResult;
use embermon_storage::{AlertInstanceRow, InstanceQuery, InstanceReader};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::error::Result;
use crate::state::{State, StateStatus};

/// Rebuilds a cache state from its persisted row.
///
/// Evaluation history, captured values and images are not persisted;
/// they refill on the next evaluation round.
pub fn row_to_state(row: &AlertInstanceRow, rule: &AlertRule) -> Result<State> {
    let state: StateStatus = row.current_state.parse()?;
    let cache_id = row.labels_hash.parse()?;
    Ok(State {
        org_id: row.rule_org_id,
        alert_rule_uid: row.rule_uid.clone(),
        cache_id,
        labels: row.labels.clone(),
        annotations: rule.annotations.clone(),
        state,
        state_reason: row.current_reason.clone(),
        result_fingerprint: row
            .result_fingerprint
            .as_deref()
            .unwrap_or_default()
            .parse()
            .unwrap_or(crate::fingerprint::Fingerprint(0)),
        error: None,
        image: None,
        values: HashMap::new(),
        starts_at: row.current_state_since,
        ends_at: row.current_state_end,
        resolved_at: row.resolved_at,
        last_evaluation_string: String::new(),
        last_evaluation_time: row.last_eval_time,
        last_sent_at: row.last_sent_at,
        evaluation_duration: Duration::zero(),
        results: VecDeque::new(),
    })
}

/// Reconciling reader over two independently-written stores.
///
/// For each rule UID the entire slice comes from whichever source has
/// the more recent max last-eval time; ties favor the primary. Rows
/// without a rule identity are dropped. Source errors are surfaced to
/// the caller; silently trusting one store mid-migration could hide
/// incomplete data.
pub struct MultiInstanceReader {
    primary: Arc<dyn InstanceReader>,
    secondary: Arc<dyn InstanceReader>,
}

impl MultiInstanceReader {
    pub fn new(primary: Arc<dyn InstanceReader>, secondary: Arc<dyn InstanceReader>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl InstanceReader for MultiInstanceReader {
    async fn list_instances(&self, query: &InstanceQuery) -> StorageResult<Vec<AlertInstanceRow>> {
        let primary = self.primary.list_instances(query).await?;
        let secondary = self.secondary.list_instances(query).await?;
        Ok(merge_by_recency(primary, secondary))
    }

    async fn list_org_ids_with_instances(&self) -> StorageResult<Vec<i64>> {
        let mut org_ids = self.primary.list_org_ids_with_instances().await?;
        for org_id in self.secondary.list_org_ids_with_instances().await? {
            if !org_ids.contains(&org_id) {
                org_ids.push(org_id);
            }
        }
        org_ids.sort_unstable();
        Ok(org_ids)
    }
}

fn group_by_rule(rows: Vec<AlertInstanceRow>) -> BTreeMap<String, Vec<AlertInstanceRow>> {
    let mut grouped: BTreeMap<String, Vec<AlertInstanceRow>> = BTreeMap::new();
    for row in rows {
        if row.rule_uid.is_empty() {
            continue;
        }
        grouped.entry(row.rule_uid.clone()).or_default().push(row);
    }
    grouped
}

fn max_eval_time(rows: &[AlertInstanceRow]) -> Option<DateTime<Utc>> {
    rows.iter().map(|r| r.last_eval_time).max()
}

fn merge_by_recency(
    primary: Vec<AlertInstanceRow>,
    secondary: Vec<AlertInstanceRow>,
) -> Vec<AlertInstanceRow> {
    let mut primary = group_by_rule(primary);
    let secondary = group_by_rule(secondary);

    let mut merged = Vec::new();
    for (uid, rows) in secondary {
        match primary.remove(&uid) {
            None => merged.extend(rows),
            Some(primary_rows) => {
                if max_eval_time(&rows) > max_eval_time(&primary_rows) {
                    merged.extend(rows);
                } else {
                    merged.extend(primary_rows);
                }
            }
        }
    }
    for (_, rows) in primary {
        merged.extend(rows);
    }
    merged.sort_by(|a, b| {
        (a.rule_uid.as_str(), a.labels_hash.as_str())
            .cmp(&(b.rule_uid.as_str(), b.labels_hash.as_str()))
    });
    merged
}
