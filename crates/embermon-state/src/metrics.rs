//! Pull-based state counts for an exporter to scrape. Read-only over the
//! cache; never mutates anything.

use std::collections::HashMap;

use crate::cache::Cache;
use crate::state::StateStatus;

/// Instance counts per state for one org.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrgStateCounts {
    pub org_id: i64,
    pub counts: HashMap<StateStatus, usize>,
}

impl OrgStateCounts {
    pub fn get(&self, state: StateStatus) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    /// Instances currently firing (alerting, recovering, or a firing
    /// synthetic state).
    pub fn firing(&self) -> usize {
        self.get(StateStatus::Alerting)
            + self.get(StateStatus::Recovering)
            + self.get(StateStatus::NoData)
            + self.get(StateStatus::Error)
    }

    pub fn pending(&self) -> usize {
        self.get(StateStatus::Pending)
    }
}

/// Walks the cache and derives per-org counts, sorted by org id.
pub fn collect(cache: &Cache) -> Vec<OrgStateCounts> {
    let mut by_org: HashMap<i64, OrgStateCounts> = HashMap::new();
    for state in cache.snapshot() {
        let entry = by_org.entry(state.org_id).or_insert_with(|| OrgStateCounts {
            org_id: state.org_id,
            counts: HashMap::new(),
        });
        *entry.counts.entry(state.state).or_insert(0) += 1;
    }
    let mut counts: Vec<OrgStateCounts> = by_org.into_values().collect();
    counts.sort_by_key(|c| c.org_id);
    counts
}
