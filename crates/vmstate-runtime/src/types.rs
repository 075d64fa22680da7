//! Runtime types.

use serde::Serialize;

use crate::drift::Drift;
use crate::health::HealthReport;
use crate::resize::ResizeOutcome;

/// The only memory carried across iterations: the instance type last applied
/// to the group. Changes only when a modify call succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationState {
    #[serde(rename = "lastAppliedType")]
    last_applied_type: String,
}

impl ReconciliationState {
    pub fn new(initial_type: impl Into<String>) -> Self {
        Self {
            last_applied_type: initial_type.into(),
        }
    }

    pub fn last_applied_type(&self) -> &str {
        &self.last_applied_type
    }

    pub(crate) fn commit(&mut self, applied_type: &str) {
        self.last_applied_type = applied_type.to_string();
    }
}

/// What happened to a resize triggered by drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResizeReport {
    /// Stop and modify succeeded; the baseline moved to the new type.
    Committed(ResizeOutcome),
    /// A step failed; the baseline is unchanged and the resize repeats next
    /// iteration.
    Aborted {
        #[serde(rename = "instanceId")]
        instance_id: String,
        to: String,
        error: String,
        /// Stop went through but modify did not.
        #[serde(rename = "instanceLeftStopped")]
        instance_left_stopped: bool,
    },
    /// Drift was detected but discovery found nothing to resize.
    NoTarget { to: String },
}

/// Summary of one loop iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    pub discovered: Vec<String>,
    #[serde(rename = "discoveryError", skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<Drift>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeReport>,
    #[serde(rename = "statusError", skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

impl IterationReport {
    pub fn new(iteration: u64) -> Self {
        Self {
            iteration,
            started_at: chrono::Utc::now().to_rfc3339(),
            discovered: Vec::new(),
            discovery_error: None,
            drift: None,
            resize: None,
            status_error: None,
            health: None,
        }
    }

    /// True when discovery failed and the rest of the iteration was skipped.
    pub fn skipped(&self) -> bool {
        self.discovery_error.is_some()
    }
}
