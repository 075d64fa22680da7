//! Reconciliation runtime: keeps a tagged group on its desired instance type.
//!
//! One iteration is: discover the group, re-read the desired state, detect
//! drift against the last applied type, resize one instance when drifted,
//! fetch per-instance status, and start anything that is not running.

mod call;
pub mod directory;
pub mod drift;
pub mod driver;
pub mod health;
pub mod resize;
pub mod types;

pub use directory::{Discovery, InstanceDirectory};
pub use drift::{detect, Drift};
pub use driver::Reconciler;
pub use health::{HealthReconciler, HealthReport, StartError};
pub use resize::{ResizeError, ResizeOutcome, ResizeSequencer};
pub use types::*;
