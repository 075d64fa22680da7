//! vmstate core: fleet data model, desired-state document, settings, errors.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DesiredConfig, DesiredStateFile, QuiesceStrategy, ReconcilerSettings};
pub use error::{Error, ProviderError, Result, DRY_RUN_OPERATION};
pub use types::{InstanceRef, InstanceStatus, LifecycleState, Operation, Reservation, TagFilter};
