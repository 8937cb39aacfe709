//! The per-instance state entity and its transition rules.
//!
//! A [`State`] is the tracked condition of one alert rule evaluated
//! against one concrete label set. [`State::transition`] is a pure
//! function of the current state, one evaluation result and the rule
//! configuration; everything stateful (cache writes, persistence,
//! delivery) happens in the manager.

use chrono::{DateTime, Duration, Utc};
use embermon_common::types::{AlertRule, EvalResult, EvalState, ExecErrPolicy, NoDataPolicy};
use std::collections::{HashMap, VecDeque};

use crate::error::StateError;
use crate::fingerprint::{fingerprint_values, Fingerprint};

/// Reason recorded when a NoData result was mapped through the rule's
/// no-data policy.
pub const REASON_NO_DATA: &str = "NoData";
/// Reason recorded when an evaluation error was mapped through the
/// rule's exec-error policy.
pub const REASON_ERROR: &str = "Error";
/// Reason recorded when an instance vanished from the rule's results and
/// was evicted as stale.
pub const REASON_MISSING_SERIES: &str = "MissingSeries";

/// Minimum evaluation-history entries kept per instance, regardless of
/// the rule's For/interval ratio.
pub const MIN_HISTORY: usize = 10;

/// Current condition of one alert instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateStatus {
    Normal,
    Pending,
    Alerting,
    Recovering,
    NoData,
    Error,
}

impl StateStatus {
    /// Firing states are eligible for delivery and, on return to Normal,
    /// produce a resolution.
    pub fn firing(self) -> bool {
        matches!(
            self,
            StateStatus::Alerting | StateStatus::Recovering | StateStatus::NoData | StateStatus::Error
        )
    }
}

impl std::fmt::Display for StateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateStatus::Normal => write!(f, "Normal"),
            StateStatus::Pending => write!(f, "Pending"),
            StateStatus::Alerting => write!(f, "Alerting"),
            StateStatus::Recovering => write!(f, "Recovering"),
            StateStatus::NoData => write!(f, "NoData"),
            StateStatus::Error => write!(f, "Error"),
        }
    }
}

impl std::str::FromStr for StateStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Normal" => Ok(StateStatus::Normal),
            "Pending" => Ok(StateStatus::Pending),
            "Alerting" => Ok(StateStatus::Alerting),
            "Recovering" => Ok(StateStatus::Recovering),
            "NoData" => Ok(StateStatus::NoData),
            "Error" => Ok(StateStatus::Error),
            _ => Err(StateError::InvalidState(s.to_string())),
        }
    }
}

/// One entry of an instance's bounded evaluation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub evaluation_time: DateTime<Utc>,
    pub evaluation_state: EvalState,
    pub values: HashMap<String, Option<f64>>,
    pub evaluation_string: String,
}

/// Reference to a screenshot attached to a firing instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub token: String,
    pub url: Option<String>,
}

/// Tracked state of one (org, rule, fingerprint) alert instance.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub org_id: i64,
    pub alert_rule_uid: String,
    pub cache_id: Fingerprint,
    /// Rule labels merged with instance labels (rule wins), plus the
    /// injected rule-identity labels.
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub state: StateStatus,
    pub state_reason: Option<String>,
    pub result_fingerprint: Fingerprint,
    pub error: Option<String>,
    pub image: Option<Image>,
    pub values: HashMap<String, Option<f64>>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_evaluation_string: String,
    pub last_evaluation_time: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub evaluation_duration: Duration,
    pub results: VecDeque<Evaluation>,
}

/// One applied transition: the new state plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub state: State,
    pub previous_state: StateStatus,
    pub previous_state_reason: Option<String>,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.previous_state != self.state.state
            || self.previous_state_reason != self.state.state_reason
    }

    /// Stale transitions mark instances evicted because their series
    /// vanished; persisters delete these instead of upserting them.
    pub fn stale(&self) -> bool {
        self.state.state == StateStatus::Normal
            && self.state.state_reason.as_deref() == Some(REASON_MISSING_SERIES)
    }
}

/// Sliding expiry for a firing instance: one missed or slow tick must not
/// resolve it.
pub fn next_ends_at(rule: &AlertRule, eval_time: DateTime<Utc>) -> DateTime<Utc> {
    let interval = rule.interval();
    let for_duration = rule.for_duration();
    if for_duration > interval {
        eval_time + for_duration
    } else {
        eval_time + interval * 2
    }
}

impl State {
    /// Applies one evaluation result, producing the next state.
    ///
    /// Pure: `self` is unchanged, the rule is read-only, and the result
    /// carries its own evaluation time.
    pub fn transition(&self, rule: &AlertRule, result: &EvalResult) -> State {
        let mut next = self.clone();
        next.last_evaluation_time = result.evaluated_at;
        next.evaluation_duration = Duration::milliseconds(result.evaluation_duration_ms);
        next.last_evaluation_string = result.evaluation_string.clone();
        next.values = result.values.clone();
        next.result_fingerprint = fingerprint_values(&result.values);
        next.results.push_back(Evaluation {
            evaluation_time: result.evaluated_at,
            evaluation_state: result.state,
            values: result.values.clone(),
            evaluation_string: result.evaluation_string.clone(),
        });

        match result.state {
            EvalState::Normal => next.result_normal(rule, result),
            EvalState::Alerting => next.result_alerting(rule, result),
            EvalState::Error => next.result_error(rule, result),
            EvalState::NoData => next.result_no_data(rule, result),
        }
        next
    }

    fn result_normal(&mut self, rule: &AlertRule, result: &EvalResult) {
        let eval_time = result.evaluated_at;
        self.error = None;

        // keep_firing_for holds a clearing alert in Recovering before it
        // may resolve
        if rule.keep_firing_for_secs > 0 {
            match self.state {
                StateStatus::Alerting => {
                    self.state = StateStatus::Recovering;
                    self.state_reason = None;
                    self.starts_at = eval_time;
                    self.ends_at = next_ends_at(rule, eval_time);
                    return;
                }
                StateStatus::Recovering => {
                    if eval_time - self.starts_at < rule.keep_firing_for() {
                        self.ends_at = next_ends_at(rule, eval_time);
                        return;
                    }
                    // held long enough, fall through to resolve
                }
                _ => {}
            }
        }

        if self.state != StateStatus::Normal {
            if self.state.firing() {
                self.resolved_at = Some(eval_time);
            }
            self.state = StateStatus::Normal;
            self.starts_at = eval_time;
            self.ends_at = eval_time;
        }
        self.state_reason = None;
    }

    fn result_alerting(&mut self, rule: &AlertRule, result: &EvalResult) {
        let eval_time = result.evaluated_at;
        self.error = None;
        self.state_reason = None;

        match self.state {
            StateStatus::Alerting => {
                self.ends_at = next_ends_at(rule, eval_time);
            }
            StateStatus::Recovering => {
                // condition came back before keep_firing_for elapsed
                self.state = StateStatus::Alerting;
                self.ends_at = next_ends_at(rule, eval_time);
            }
            StateStatus::Pending => {
                if eval_time - self.starts_at > rule.for_duration() {
                    self.state = StateStatus::Alerting;
                    self.starts_at = eval_time;
                }
                self.ends_at = next_ends_at(rule, eval_time);
            }
            _ => {
                self.starts_at = eval_time;
                self.ends_at = next_ends_at(rule, eval_time);
                self.resolved_at = None;
                self.state = if rule.for_secs <= 0 {
                    StateStatus::Alerting
                } else {
                    StateStatus::Pending
                };
            }
        }
    }

    fn result_error(&mut self, rule: &AlertRule, result: &EvalResult) {
        let eval_time = result.evaluated_at;
        self.error = Some(
            result
                .error
                .clone()
                .unwrap_or_else(|| "failed to evaluate".to_string()),
        );

        let (target, reason) = match rule.exec_err_state {
            ExecErrPolicy::Alerting => (StateStatus::Alerting, Some(REASON_ERROR.to_string())),
            ExecErrPolicy::Error => (StateStatus::Error, None),
        };

        if self.state != target {
            self.starts_at = eval_time;
            self.resolved_at = None;
            self.state = target;
        }
        self.state_reason = reason;
        self.ends_at = next_ends_at(rule, eval_time);
    }

    fn result_no_data(&mut self, rule: &AlertRule, result: &EvalResult) {
        let eval_time = result.evaluated_at;

        // the policy overrides whatever state preceded the NoData result
        let (target, reason) = match rule.no_data_state {
            NoDataPolicy::Alerting => (StateStatus::Alerting, Some(REASON_NO_DATA.to_string())),
            NoDataPolicy::NoData => (StateStatus::NoData, None),
            NoDataPolicy::Ok => (StateStatus::Normal, Some(REASON_NO_DATA.to_string())),
        };

        if self.state != target {
            if target == StateStatus::Normal {
                if self.state.firing() {
                    self.resolved_at = Some(eval_time);
                }
            } else {
                self.resolved_at = None;
            }
            self.starts_at = eval_time;
            self.state = target;
        }
        self.state_reason = reason;
        self.ends_at = if target == StateStatus::Normal {
            eval_time
        } else {
            next_ends_at(rule, eval_time)
        };
    }

    /// Marks the instance stale: its series vanished from the rule's
    /// results long enough ago that the state resolves to Normal.
    pub fn to_stale(&self, eval_time: DateTime<Utc>) -> State {
        let mut next = self.clone();
        if next.state.firing() {
            next.resolved_at = Some(eval_time);
        }
        next.state = StateStatus::Normal;
        next.state_reason = Some(REASON_MISSING_SERIES.to_string());
        next.starts_at = eval_time;
        next.ends_at = eval_time;
        next.last_evaluation_time = eval_time;
        next.error = None;
        next
    }

    /// Whether this state is due for (re)delivery.
    ///
    /// Firing states resend once `resend_delay` has elapsed since the
    /// last send; a resolution is delivered exactly once and is not
    /// gated by the resend delay.
    pub fn needs_sending(&self, resend_delay: Duration) -> bool {
        match self.state {
            StateStatus::Alerting
            | StateStatus::Recovering
            | StateStatus::NoData
            | StateStatus::Error => match self.last_sent_at {
                None => true,
                Some(sent) => sent + resend_delay <= self.last_evaluation_time,
            },
            StateStatus::Normal => match (self.resolved_at, self.last_sent_at) {
                (Some(_), None) => true,
                (Some(resolved), Some(sent)) => sent < resolved,
                (None, _) => false,
            },
            StateStatus::Pending => false,
        }
    }

    /// Bounds the evaluation history to `cap` entries, dropping the
    /// oldest.
    pub fn trim_results(&mut self, cap: usize) {
        while self.results.len() > cap {
            self.results.pop_front();
        }
    }
}

/// History cap for a rule: enough to cover two For windows at the rule's
/// interval, never fewer than [`MIN_HISTORY`] entries.
pub fn history_cap(rule: &AlertRule) -> usize {
    if rule.interval_secs <= 0 {
        return MIN_HISTORY;
    }
    let window = (2 * rule.for_secs) / rule.interval_secs;
    (window.max(0) as usize).max(MIN_HISTORY)
}
