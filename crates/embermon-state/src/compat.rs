//! Conversion from state transitions to the wire shape the alert
//! delivery layer accepts.
//!
//! NoData and Error states are delivered under fixed sentinel identities
//! so routing can treat them separately from real alerts; the original
//! rule name survives under a backup label. A resolution whose previous
//! state was synthetic must reuse the sentinel identity, or delivery
//! would never expire the synthetic alert it posted earlier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cache::ALERT_NAME_LABEL;
use crate::state::{StateStatus, StateTransition};

/// Identity used for alerts produced by a NoData state.
pub const NO_DATA_ALERT_NAME: &str = "DatasourceNoData";
/// Identity used for alerts produced by an Error state.
pub const ERROR_ALERT_NAME: &str = "DatasourceError";
/// Backup label preserving the original rule name on synthetic alerts.
pub const RULE_NAME_BACKUP_LABEL: &str = "rulename";

/// Annotation carrying the rendered evaluation string.
pub const VALUE_STRING_ANNOTATION: &str = "__value_string__";
/// Annotation carrying the captured values as a JSON object.
pub const VALUES_ANNOTATION: &str = "__values__";
/// Annotation carrying the attached screenshot token.
pub const IMAGE_TOKEN_ANNOTATION: &str = "__alertImageToken__";

/// Outbound alert in the shape the delivery sink accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostableAlert {
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub generator_url: String,
}

impl PostableAlert {
    pub fn name(&self) -> Option<&str> {
        self.labels.get(ALERT_NAME_LABEL).map(String::as_str)
    }
}

/// The state whose identity this transition is delivered under: the
/// current one, except that a fresh resolution keeps the identity of the
/// firing state it resolves.
fn identity_state(transition: &StateTransition) -> StateStatus {
    let state = &transition.state;
    if state.state == StateStatus::Normal && state.resolved_at.is_some() {
        transition.previous_state
    } else {
        state.state
    }
}

/// Renders one transition into a postable alert.
pub fn state_to_postable(transition: &StateTransition, external_url: &str) -> PostableAlert {
    let state = &transition.state;
    let mut labels = state.labels.clone();
    let mut annotations = state.annotations.clone();

    if !state.last_evaluation_string.is_empty() {
        annotations.insert(
            VALUE_STRING_ANNOTATION.to_string(),
            state.last_evaluation_string.clone(),
        );
    }
    if !state.values.is_empty() {
        if let Ok(json) = serde_json::to_string(&state.values) {
            annotations.insert(VALUES_ANNOTATION.to_string(), json);
        }
    }
    if let Some(image) = &state.image {
        match &image.url {
            Some(url) => {
                annotations.insert(IMAGE_TOKEN_ANNOTATION.to_string(), url.clone());
            }
            None => {
                annotations.insert(IMAGE_TOKEN_ANNOTATION.to_string(), image.token.clone());
            }
        }
    }

    let sentinel = match identity_state(transition) {
        StateStatus::NoData => Some(NO_DATA_ALERT_NAME),
        StateStatus::Error => Some(ERROR_ALERT_NAME),
        _ => None,
    };
    if let Some(name) = sentinel {
        if let Some(original) = labels.insert(ALERT_NAME_LABEL.to_string(), name.to_string()) {
            labels.insert(RULE_NAME_BACKUP_LABEL.to_string(), original);
        }
    }

    let ends_at = match (state.state, state.resolved_at) {
        (StateStatus::Normal, Some(resolved)) => resolved,
        _ => state.ends_at,
    };

    PostableAlert {
        labels,
        annotations,
        starts_at: state.starts_at,
        ends_at,
        generator_url: format!(
            "{}/alerting/{}/view",
            external_url.trim_end_matches('/'),
            state.alert_rule_uid
        ),
    }
}

/// Renders every transition that is due for delivery.
pub fn transitions_to_postables(
    transitions: &[StateTransition],
    resend_delay: chrono::Duration,
    external_url: &str,
) -> Vec<PostableAlert> {
    transitions
        .iter()
        .filter(|tr| tr.state.needs_sending(resend_delay))
        .map(|tr| state_to_postable(tr, external_url))
        .collect()
}
