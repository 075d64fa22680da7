//! Drift detection between the applied and the desired instance type.

use serde::Serialize;
use vmstate_core::DesiredConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub changed: bool,
    pub previous: String,
    #[serde(rename = "newType")]
    pub new_type: String,
}

/// Compare the last applied type with a fresh desired config.
///
/// Pure: calling it again with the same inputs gives the same answer, so an
/// unchanged document never triggers a resize.
pub fn detect(last_applied_type: &str, fresh: &DesiredConfig) -> Drift {
    Drift {
        changed: fresh.instance_type != last_applied_type,
        previous: last_applied_type.to_string(),
        new_type: fresh.instance_type.clone(),
    }
}
