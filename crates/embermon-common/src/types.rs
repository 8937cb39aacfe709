use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one alert rule within one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub org_id: i64,
    pub uid: String,
}

impl RuleKey {
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{orgID: {}, UID: {}}}", self.org_id, self.uid)
    }
}

/// Per-rule policy mapping a "no data" evaluation to a target state.
///
/// # Examples
///
/// ```
/// use embermon_common::types::NoDataPolicy;
///
/// let p: NoDataPolicy = "Alerting".parse().unwrap();
/// assert_eq!(p, NoDataPolicy::Alerting);
/// assert_eq!(NoDataPolicy::Ok.to_string(), "OK");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NoDataPolicy {
    Alerting,
    #[default]
    NoData,
    #[serde(rename = "OK")]
    Ok,
}

impl std::fmt::Display for NoDataPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoDataPolicy::Alerting => write!(f, "Alerting"),
            NoDataPolicy::NoData => write!(f, "NoData"),
            NoDataPolicy::Ok => write!(f, "OK"),
        }
    }
}

impl std::str::FromStr for NoDataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alerting" => Ok(NoDataPolicy::Alerting),
            "NoData" => Ok(NoDataPolicy::NoData),
            "OK" => Ok(NoDataPolicy::Ok),
            _ => Err(format!("unknown no-data policy: {s}")),
        }
    }
}

/// Per-rule policy mapping an evaluation failure to a target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecErrPolicy {
    Alerting,
    #[default]
    Error,
}

impl std::fmt::Display for ExecErrPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecErrPolicy::Alerting => write!(f, "Alerting"),
            ExecErrPolicy::Error => write!(f, "Error"),
        }
    }
}

impl std::str::FromStr for ExecErrPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Alerting" => Ok(ExecErrPolicy::Alerting),
            "Error" => Ok(ExecErrPolicy::Error),
            _ => Err(format!("unknown exec-error policy: {s}")),
        }
    }
}

/// Raw outcome of evaluating one rule instance for one round, as reported
/// by the expression engine. `Normal` means the condition did not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalState {
    Normal,
    Alerting,
    NoData,
    Error,
}

impl std::fmt::Display for EvalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalState::Normal => write!(f, "Normal"),
            EvalState::Alerting => write!(f, "Alerting"),
            EvalState::NoData => write!(f, "NoData"),
            EvalState::Error => write!(f, "Error"),
        }
    }
}

/// Configuration of one alert rule, read-only for the duration of a round.
///
/// `for_secs` is the minimum continuous-condition time before a pending
/// instance promotes to alerting; `keep_firing_for_secs` keeps a firing
/// instance in the `Recovering` state for that long after the condition
/// clears (0 disables the phase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub uid: String,
    pub org_id: i64,
    pub title: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub interval_secs: i64,
    #[serde(default)]
    pub for_secs: i64,
    #[serde(default)]
    pub keep_firing_for_secs: i64,
    #[serde(default)]
    pub no_data_state: NoDataPolicy,
    #[serde(default)]
    pub exec_err_state: ExecErrPolicy,
}

impl AlertRule {
    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.org_id, self.uid.clone())
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs)
    }

    pub fn for_duration(&self) -> Duration {
        Duration::seconds(self.for_secs)
    }

    pub fn keep_firing_for(&self) -> Duration {
        Duration::seconds(self.keep_firing_for_secs)
    }
}

/// One evaluation result for one rule instance: the labels identifying the
/// instance, the raw outcome, and the captured values backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    /// Labels of the evaluated series, before merging with rule labels.
    pub instance: HashMap<String, String>,
    pub state: EvalState,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_duration_ms: i64,
    /// Captured named values; `None` when the expression produced no
    /// number for the name (e.g. NaN from a reduce step).
    pub values: HashMap<String, Option<f64>>,
    /// Human-readable rendering of the evaluated expression, e.g.
    /// `[ var='B' labels={host=web-01} value=96.2 ]`.
    pub evaluation_string: String,
    pub error: Option<String>,
}

/// Format a label map into a stable human-readable string.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use embermon_common::types::format_labels;
///
/// let mut labels = HashMap::new();
/// labels.insert("host".to_string(), "web-01".to_string());
/// labels.insert("mount".to_string(), "/data".to_string());
/// assert_eq!(format_labels(&labels), "host=web-01, mount=/data");
/// ```
pub fn format_labels(labels: &HashMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}

/// Merge label maps, later maps winning on key conflicts.
pub fn merge_labels(sets: &[&HashMap<String, String>]) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    for set in sets {
        for (k, v) in set.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_labels_later_sets_win() {
        let mut base = HashMap::new();
        base.insert("severity".to_string(), "warning".to_string());
        base.insert("team".to_string(), "infra".to_string());
        let mut over = HashMap::new();
        over.insert("severity".to_string(), "critical".to_string());

        let merged = merge_labels(&[&base, &over]);
        assert_eq!(merged.get("severity").unwrap(), "critical");
        assert_eq!(merged.get("team").unwrap(), "infra");
    }

    #[test]
    fn policies_round_trip_through_strings() {
        for p in [NoDataPolicy::Alerting, NoDataPolicy::NoData, NoDataPolicy::Ok] {
            let parsed: NoDataPolicy = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
        for p in [ExecErrPolicy::Alerting, ExecErrPolicy::Error] {
            let parsed: ExecErrPolicy = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
    }
}
