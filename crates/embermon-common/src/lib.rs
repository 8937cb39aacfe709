//! Shared types for the embermon alerting state subsystem.
//!
//! This crate carries the contracts the state tracker consumes from the
//! rest of the system: alert-rule configuration as produced by the rule
//! store, and per-round evaluation results as produced by the expression
//! engine. It deliberately contains no behavior beyond parsing,
//! formatting and label arithmetic.

pub mod types;
