//! Concurrent in-memory map from (org, rule, fingerprint) to [`State`].
//!
//! Reads run concurrently; writes are exclusive. Write volume tracks
//! evaluation throughput, not request throughput, so a single
//! reader-writer lock over the whole map is enough. Callers must never
//! hold the lock across I/O; every accessor clones out of the lock.

use chrono::{DateTime, Duration, Utc};
use embermon_common::types::{merge_labels, AlertRule, EvalResult, EvalState, RuleKey};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use crate::error::{Result, StateError};
use crate::fingerprint::{fingerprint, fingerprint_values, Fingerprint};
use crate::state::{history_cap, next_ends_at, State, StateStatus};

/// Label injected on every instance carrying the rule title.
pub const ALERT_NAME_LABEL: &str = "alertname";
/// Label injected on every instance carrying the rule UID.
pub const RULE_UID_LABEL: &str = "__alert_rule_uid__";

type OrgStates = HashMap<String, HashMap<Fingerprint, State>>;

/// One cache per manager; construct and inject explicitly.
#[derive(Default)]
pub struct Cache {
    states: RwLock<HashMap<i64, OrgStates>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached state for the result's fingerprint, creating a
    /// Normal seed state on first sight.
    ///
    /// The seed's interval starts at the evaluation time: when the very
    /// first result is already alerting there is no earlier data to
    /// infer a start from.
    pub fn get_or_create(
        &self,
        rule: &AlertRule,
        result: &EvalResult,
        external_labels: &HashMap<String, String>,
    ) -> State {
        let mut identity = HashMap::new();
        identity.insert(ALERT_NAME_LABEL.to_string(), rule.title.clone());
        identity.insert(RULE_UID_LABEL.to_string(), rule.uid.clone());
        let labels = merge_labels(&[external_labels, &result.instance, &rule.labels, &identity]);
        let cache_id = fingerprint(&labels);

        let mut states = self.states.write();
        let entry = states
            .entry(rule.org_id)
            .or_default()
            .entry(rule.uid.clone())
            .or_default()
            .entry(cache_id)
            .or_insert_with(|| new_state(rule, result, labels, cache_id));
        entry.clone()
    }

    /// Upserts the state under its own identity.
    pub fn set(&self, state: State) {
        let mut states = self.states.write();
        states
            .entry(state.org_id)
            .or_default()
            .entry(state.alert_rule_uid.clone())
            .or_default()
            .insert(state.cache_id, state);
    }

    /// Point lookup; `NotFound` when the instance is not cached.
    pub fn get(&self, org_id: i64, rule_uid: &str, cache_id: Fingerprint) -> Result<State> {
        let states = self.states.read();
        states
            .get(&org_id)
            .and_then(|org| org.get(rule_uid))
            .and_then(|rule| rule.get(&cache_id))
            .cloned()
            .ok_or_else(|| StateError::NotFound {
                org_id,
                rule_uid: rule_uid.to_string(),
                fingerprint: cache_id.to_string(),
            })
    }

    /// Removes and returns one instance, if cached.
    pub fn remove(&self, org_id: i64, rule_uid: &str, cache_id: Fingerprint) -> Option<State> {
        let mut states = self.states.write();
        states
            .get_mut(&org_id)
            .and_then(|org| org.get_mut(rule_uid))
            .and_then(|rule| rule.remove(&cache_id))
    }

    /// Snapshot of every state in the org.
    pub fn get_all(&self, org_id: i64) -> Vec<State> {
        let states = self.states.read();
        states
            .get(&org_id)
            .map(|org| {
                org.values()
                    .flat_map(|rule| rule.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every state of one rule.
    pub fn get_states_for_rule(&self, org_id: i64, rule_uid: &str) -> Vec<State> {
        let states = self.states.read();
        states
            .get(&org_id)
            .and_then(|org| org.get(rule_uid))
            .map(|rule| rule.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the whole cache, for full-replace persistence.
    pub fn snapshot(&self) -> Vec<State> {
        let states = self.states.read();
        states
            .values()
            .flat_map(|org| org.values())
            .flat_map(|rule| rule.values().cloned())
            .collect()
    }

    /// Every (org, rule) pair currently holding states.
    pub fn rule_keys(&self) -> Vec<RuleKey> {
        let states = self.states.read();
        let mut keys = Vec::new();
        for (org_id, org) in states.iter() {
            for rule_uid in org.keys() {
                keys.push(RuleKey::new(*org_id, rule_uid.clone()));
            }
        }
        keys
    }

    /// Clears everything. Used once before a cold-start warm-load.
    pub fn reset(&self) {
        self.states.write().clear();
    }

    /// Bounds each of the rule's states to its evaluation-history cap,
    /// preventing unbounded growth on long-lived rules.
    pub fn trim(&self, rule: &AlertRule) {
        let cap = history_cap(rule);
        let mut states = self.states.write();
        if let Some(rule_states) = states
            .get_mut(&rule.org_id)
            .and_then(|org| org.get_mut(&rule.uid))
        {
            for state in rule_states.values_mut() {
                state.trim_results(cap);
            }
        }
    }

    /// States of the rule whose last evaluation is older than the round
    /// time by more than `stale_after`. Used for missing-series eviction.
    pub fn stale_states(
        &self,
        rule: &AlertRule,
        round_time: DateTime<Utc>,
        stale_after: Duration,
    ) -> Vec<State> {
        let states = self.states.read();
        states
            .get(&rule.org_id)
            .and_then(|org| org.get(&rule.uid))
            .map(|rule_states| {
                rule_states
                    .values()
                    .filter(|s| {
                        s.last_evaluation_time < round_time
                            && s.last_evaluation_time + stale_after < round_time
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn new_state(
    rule: &AlertRule,
    result: &EvalResult,
    labels: HashMap<String, String>,
    cache_id: Fingerprint,
) -> State {
    let eval_time = result.evaluated_at;
    let ends_at = if result.state == EvalState::Alerting {
        next_ends_at(rule, eval_time)
    } else {
        eval_time
    };
    State {
        org_id: rule.org_id,
        alert_rule_uid: rule.uid.clone(),
        cache_id,
        labels,
        annotations: rule.annotations.clone(),
        state: StateStatus::Normal,
        state_reason: None,
        result_fingerprint: fingerprint_values(&result.values),
        error: None,
        image: None,
        values: HashMap::new(),
        starts_at: eval_time,
        ends_at,
        resolved_at: None,
        last_evaluation_string: String::new(),
        last_evaluation_time: eval_time,
        last_sent_at: None,
        evaluation_duration: Duration::zero(),
        results: VecDeque::new(),
    }
}
