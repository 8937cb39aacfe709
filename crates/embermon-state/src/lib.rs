//! Alert instance state tracking for embermon.
//!
//! For every active (rule, label-set) instance this crate tracks the
//! current alerting state across evaluation rounds, applies the
//! multi-state transition rules (Pending promotion after `For`,
//! NoData/Error policies, keep-firing recovery), and keeps the state
//! durable through a configurable persistence strategy so restarts and
//! store migrations are survivable.
//!
//! The [`manager::Manager`] is the entry point: feed it one rule's
//! evaluation results per round, run its background task for async
//! persistence, warm it from storage after a restart.

pub mod cache;
pub mod compat;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod metrics;
pub mod persist;
pub mod reader;
pub mod state;


pub use cache::Cache;
pub use compat::PostableAlert;
pub use fingerprint::Fingerprint;
pub use manager::{AlertsSender, ImageService, Manager, ManagerConfig, NoopImageService, RuleReader};
pub use persist::{PersisterConfig, PersisterKind, StatePersister};
pub use reader::MultiInstanceReader;
pub use state::{State, StateStatus, StateTransition};
