/// Errors produced by the state tracker.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A point lookup missed; the caller decides whether to create or
    /// report.
    #[error("State: no cached state for rule {rule_uid} in org {org_id} with fingerprint {fingerprint}")]
    NotFound {
        org_id: i64,
        rule_uid: String,
        fingerprint: String,
    },

    /// A transition without a rule identity cannot form a storage key.
    #[error("State: transition has no rule identity and cannot be persisted")]
    MissingIdentity,

    /// A persisted state string no longer parses.
    #[error("State: unknown state '{0}'")]
    InvalidState(String),

    /// A persisted fingerprint is not a 64-bit hex value.
    #[error("State: invalid fingerprint '{0}'")]
    InvalidFingerprint(String),
}

/// Convenience `Result` alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
