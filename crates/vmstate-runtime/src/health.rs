//! Health reconciler: start every discovered instance that is not running.
//!
//! Starts go through a dry-run permission probe first. A `DryRunOperation`
//! answer means the real call would be allowed, so exactly one real start
//! follows. Any other probe answer is a failure for this iteration; the
//! instance still shows as not running next time and gets another try.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use vmstate_core::{InstanceStatus, Operation, ProviderError};
use vmstate_provider::InstanceControl;

use crate::call::bounded;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("start permission probe for {instance_id} failed: {source}")]
    Probe {
        instance_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("start permission probe for {instance_id} succeeded without a DryRunOperation answer")]
    ProbeInconclusive { instance_id: String },

    #[error("starting {instance_id} failed: {source}")]
    Start {
        instance_id: String,
        #[source]
        source: ProviderError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartFailure {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub error: String,
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Status rows that belonged to the discovered set.
    pub checked: usize,
    pub running: Vec<String>,
    pub started: Vec<String>,
    pub failed: Vec<StartFailure>,
    /// Status rows for ids outside the discovered set.
    pub ignored: Vec<String>,
}

pub struct HealthReconciler<P: ?Sized> {
    provider: Arc<P>,
    call_timeout: Duration,
}

impl<P: InstanceControl + ?Sized> HealthReconciler<P> {
    pub fn new(provider: Arc<P>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Start every not-running instance among `statuses` that was discovered
    /// this iteration. Failures are logged and reported, never returned.
    pub async fn reconcile(
        &self,
        discovered: &[String],
        statuses: &[InstanceStatus],
    ) -> HealthReport {
        let mut report = HealthReport::default();

        for status in statuses {
            if !discovered.contains(&status.id) {
                debug!(instance_id = %status.id, "Ignoring status for undiscovered instance");
                report.ignored.push(status.id.clone());
                continue;
            }
            report.checked += 1;

            if status.state.is_running() {
                debug!(instance_id = %status.id, "Instance is running");
                report.running.push(status.id.clone());
                continue;
            }

            info!(instance_id = %status.id, state = %status.state, "Instance is not running");
            match self.start_with_probe(&status.id).await {
                Ok(()) => {
                    info!(instance_id = %status.id, "Started instance");
                    report.started.push(status.id.clone());
                }
                Err(e) => {
                    error!(instance_id = %status.id, error = %e, "Could not start instance");
                    report.failed.push(StartFailure {
                        instance_id: status.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Dry-run start, then the real start if and only if the probe answered
    /// `DryRunOperation`.
    pub async fn start_with_probe(&self, instance_id: &str) -> Result<(), StartError> {
        let ids = vec![instance_id.to_string()];

        let probe = bounded(
            Operation::StartInstances,
            self.call_timeout,
            self.provider.start_instances(&ids, true),
        )
        .await;

        match probe {
            Err(e) if e.is_dry_run_operation() => {
                debug!(instance_id, "Start permission confirmed");
            }
            Err(source) => {
                return Err(StartError::Probe {
                    instance_id: instance_id.to_string(),
                    source,
                })
            }
            Ok(()) => {
                return Err(StartError::ProbeInconclusive {
                    instance_id: instance_id.to_string(),
                })
            }
        }

        bounded(
            Operation::StartInstances,
            self.call_timeout,
            self.provider.start_instances(&ids, false),
        )
        .await
        .map_err(|source| StartError::Start {
            instance_id: instance_id.to_string(),
            source,
        })
    }
}
