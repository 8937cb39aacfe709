//! Composition root: owns the cache, applies results, orchestrates the
//! configured persistence strategy, and hands due alerts to delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use embermon_common::types::{AlertRule, EvalResult, RuleKey};
use embermon_storage::{InstanceQuery, InstanceReader, InstanceStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::compat::{state_to_postable, PostableAlert};
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::metrics::{self, OrgStateCounts};
use crate::persist::{build_persister, PersisterConfig, StatePersister};
use crate::reader::row_to_state;
use crate::state::{Image, State, StateStatus, StateTransition};

/// Source of rule definitions, read-only per round.
#[async_trait]
pub trait RuleReader: Send + Sync {
    async fn list_rules(&self, org_id: i64) -> anyhow::Result<Vec<AlertRule>>;
}

/// Screenshot capability. Best-effort: a failure leaves the state's
/// image empty and processing continues.
#[async_trait]
pub trait ImageService: Send + Sync {
    async fn new_image(&self, rule: &AlertRule) -> anyhow::Result<Image>;
}

/// Image service for deployments without screenshot support.
pub struct NoopImageService;

#[async_trait]
impl ImageService for NoopImageService {
    async fn new_image(&self, _rule: &AlertRule) -> anyhow::Result<Image> {
        Err(anyhow::anyhow!("screenshots are not available"))
    }
}

/// Downstream alert delivery sink.
#[async_trait]
pub trait AlertsSender: Send + Sync {
    async fn send(&self, key: &RuleKey, alerts: Vec<PostableAlert>) -> anyhow::Result<()>;
}

fn default_external_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_resend_delay_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Base URL used to build generator links on outbound alerts.
    #[serde(default = "default_external_url")]
    pub external_url: String,
    /// Minimum spacing between repeat notifications for the same firing
    /// instance.
    #[serde(default = "default_resend_delay_secs")]
    pub resend_delay_secs: u64,
    #[serde(default)]
    pub persister: PersisterConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            external_url: default_external_url(),
            resend_delay_secs: default_resend_delay_secs(),
            persister: PersisterConfig::default(),
        }
    }
}

/// Tracks alert instance state across evaluation rounds.
pub struct Manager {
    cache: Cache,
    store: Arc<dyn InstanceStore>,
    persister: Box<dyn StatePersister>,
    images: Arc<dyn ImageService>,
    external_url: String,
    resend_delay: Duration,
}

impl Manager {
    pub fn new(
        config: &ManagerConfig,
        store: Arc<dyn InstanceStore>,
        images: Arc<dyn ImageService>,
    ) -> Self {
        let persister = build_persister(&config.persister, store.clone());
        Self {
            cache: Cache::new(),
            store,
            persister,
            images,
            external_url: config.external_url.clone(),
            resend_delay: Duration::seconds(config.resend_delay_secs as i64),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Applies one rule round.
    ///
    /// Results for the same fingerprint must arrive in evaluation-time
    /// order; distinct fingerprints carry no ordering guarantee.
    /// Returns every transition of the round, including stale evictions.
    pub async fn process_eval_results(
        &self,
        rule: &AlertRule,
        evaluated_at: DateTime<Utc>,
        results: &[EvalResult],
        external_labels: &HashMap<String, String>,
        sender: &dyn AlertsSender,
    ) -> Vec<StateTransition> {
        let key = rule.key();
        let mut transitions = Vec::with_capacity(results.len());

        for result in results {
            let current = self.cache.get_or_create(rule, result, external_labels);
            let mut next = current.transition(rule, result);

            if next.state == StateStatus::Alerting && next.image.is_none() {
                match self.images.new_image(rule).await {
                    Ok(image) => next.image = Some(image),
                    Err(e) => {
                        tracing::debug!(rule_uid = %rule.uid, error = %e,
                            "No image attached to alert");
                    }
                }
            }

            if current.state != next.state {
                tracing::debug!(
                    rule_uid = %rule.uid,
                    instance = %next.cache_id,
                    previous = %current.state,
                    state = %next.state,
                    "State transition"
                );
            }

            self.cache.set(next.clone());
            transitions.push(StateTransition {
                state: next,
                previous_state: current.state,
                previous_state_reason: current.state_reason,
            });
        }

        // evict instances whose series stopped appearing in the results
        let stale_after = rule.interval() * 2;
        for state in self.cache.stale_states(rule, evaluated_at, stale_after) {
            self.cache
                .remove(state.org_id, &state.alert_rule_uid, state.cache_id);
            tracing::debug!(
                rule_uid = %rule.uid,
                instance = %state.cache_id,
                "Evicting stale alert instance"
            );
            transitions.push(StateTransition {
                state: state.to_stale(evaluated_at),
                previous_state: state.state,
                previous_state_reason: state.state_reason,
            });
        }

        self.cache.trim(rule);

        self.persister.sync(&key, &transitions).await;

        let mut alerts = Vec::new();
        for transition in &mut transitions {
            if !transition.state.needs_sending(self.resend_delay) {
                continue;
            }
            alerts.push(state_to_postable(transition, &self.external_url));
            let mut sent = transition.state.clone();
            sent.last_sent_at = Some(sent.last_evaluation_time);
            // evicted instances must not reappear in the cache
            if !transition.stale() {
                self.cache.set(sent.clone());
            }
            transition.state = sent;
        }
        if !alerts.is_empty() {
            if let Err(e) = sender.send(&key, alerts).await {
                tracing::error!(rule_uid = %key.uid, error = %e,
                    "Failed to hand alerts to the delivery sink");
            }
        }

        transitions
    }

    /// Runs the configured persister's background task until `cancel`
    /// fires; the persister completes its final flush before this
    /// returns.
    pub async fn run(&self, cancel: CancellationToken) {
        self.persister.run_async(cancel, &self.cache).await;
    }

    /// Rebuilds the cache from persisted state after a restart.
    ///
    /// Read failures yield an empty (or partial) warm-load, never an
    /// error: evaluation re-derives state on the next round.
    pub async fn warm(&self, instances: &dyn InstanceReader, rules: &dyn RuleReader) {
        self.cache.reset();

        let org_ids = match instances.list_org_ids_with_instances().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list orgs for warm-load, starting cold");
                return;
            }
        };

        let mut loaded = 0usize;
        for org_id in org_ids {
            let org_rules = match rules.list_rules(org_id).await {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::warn!(org_id, error = %e,
                        "Failed to read rules for warm-load, skipping org");
                    continue;
                }
            };
            let by_uid: HashMap<&str, &AlertRule> =
                org_rules.iter().map(|r| (r.uid.as_str(), r)).collect();

            let rows = match instances.list_instances(&InstanceQuery::org(org_id)).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(org_id, error = %e,
                        "Failed to read instances for warm-load, skipping org");
                    continue;
                }
            };

            for row in rows {
                // orphaned rows stay out of the cache; cleanup removes them
                let Some(rule) = by_uid.get(row.rule_uid.as_str()) else {
                    continue;
                };
                match row_to_state(&row, rule) {
                    Ok(state) => {
                        self.cache.set(state);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(org_id, rule_uid = %row.rule_uid, error = %e,
                            "Skipping unreadable persisted instance");
                    }
                }
            }
        }
        tracing::info!(instances = loaded, "Warmed state cache");
    }

    /// Deletes persisted instances whose rule no longer exists. Returns
    /// the number of rows removed.
    pub async fn clean(&self, rules: &dyn RuleReader) -> anyhow::Result<u64> {
        let mut removed_total = 0u64;
        for org_id in self.store.list_org_ids_with_instances().await? {
            let defined: HashSet<String> = rules
                .list_rules(org_id)
                .await?
                .into_iter()
                .map(|r| r.uid)
                .collect();
            for uid in self.store.list_rule_uids_with_instances(org_id).await? {
                if defined.contains(&uid) {
                    continue;
                }
                let key = RuleKey::new(org_id, uid);
                let removed = self.store.delete_rule_instances(&key).await?;
                tracing::info!(org_id, rule_uid = %key.uid, removed,
                    "Deleted orphaned alert instances");
                removed_total += removed;
            }
        }
        Ok(removed_total)
    }

    /// Periodic orphan cleanup, until `cancel` fires.
    pub async fn run_cleanup(
        &self,
        rules: &dyn RuleReader,
        interval_secs: u64,
        cancel: CancellationToken,
    ) {
        let mut tick = interval(tokio::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.clean(rules).await {
                        Ok(removed) if removed > 0 => {
                            tracing::info!(removed, "Cleaned up orphaned alert instances")
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Instance cleanup failed"),
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    pub fn get_all(&self, org_id: i64) -> Vec<State> {
        self.cache.get_all(org_id)
    }

    pub fn get_states_for_rule(&self, org_id: i64, rule_uid: &str) -> Vec<State> {
        self.cache.get_states_for_rule(org_id, rule_uid)
    }

    pub fn get_state(&self, org_id: i64, rule_uid: &str, cache_id: Fingerprint) -> Result<State> {
        self.cache.get(org_id, rule_uid, cache_id)
    }

    /// Current per-org state counts, for a metrics exporter to scrape.
    pub fn state_counts(&self) -> Vec<OrgStateCounts> {
        metrics::collect(&self.cache)
    }
}
