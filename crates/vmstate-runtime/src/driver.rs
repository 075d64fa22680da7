//! Loop driver: ties discovery, drift, resize and health together.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use vmstate_core::{DesiredConfig, DesiredStateFile, ReconcilerSettings, Result, TagFilter};
use vmstate_provider::InstanceProvider;

use crate::directory::InstanceDirectory;
use crate::drift::detect;
use crate::health::HealthReconciler;
use crate::resize::ResizeSequencer;
use crate::types::{IterationReport, ReconciliationState, ResizeReport};

/// Reconciliation loop for one tag group. Owns that group's
/// `ReconciliationState`; nothing else may mutate it.
pub struct Reconciler<P: ?Sized> {
    directory: InstanceDirectory<P>,
    sequencer: ResizeSequencer<P>,
    health: HealthReconciler<P>,
    desired: DesiredStateFile,
    settings: ReconcilerSettings,
    state: ReconciliationState,
    iterations: u64,
}

impl<P: InstanceProvider + ?Sized> Reconciler<P> {
    /// `initial` is the desired config read at startup; its instance type is
    /// the first baseline.
    pub fn new(
        provider: Arc<P>,
        filter: TagFilter,
        desired: DesiredStateFile,
        initial: &DesiredConfig,
        settings: ReconcilerSettings,
    ) -> Self {
        let timeout = settings.call_timeout();
        Self {
            directory: InstanceDirectory::new(provider.clone(), filter, timeout),
            sequencer: ResizeSequencer::new(provider.clone(), settings.quiesce, timeout),
            health: HealthReconciler::new(provider, timeout),
            desired,
            settings,
            state: ReconciliationState::new(initial.instance_type.clone()),
            iterations: 0,
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn filter(&self) -> &TagFilter {
        self.directory.filter()
    }

    /// Run one pass of the loop body.
    ///
    /// Only a failed desired-state re-read is returned as an error; provider
    /// failures are logged, recorded in the report, and retried next pass.
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        self.iterations += 1;
        let mut report = IterationReport::new(self.iterations);

        let discovery = match self.directory.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(error = %e, "Discovery failed, skipping iteration");
                report.discovery_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.discovered = discovery.instance_ids();

        let desired = self.desired.read()?;
        let drift = detect(self.state.last_applied_type(), &desired);

        if drift.changed {
            info!(
                from = %drift.previous,
                to = %drift.new_type,
                "Found change in instance type"
            );
            let outcome = match discovery.representative() {
                None => {
                    warn!(to = %drift.new_type, "No instance discovered to resize");
                    ResizeReport::NoTarget {
                        to: drift.new_type.clone(),
                    }
                }
                Some(target) => {
                    if discovery.len() > 1 {
                        warn!(
                            instance_id = %target.id,
                            group_size = discovery.len(),
                            "Resizing only the first discovered instance"
                        );
                    }
                    match self
                        .sequencer
                        .resize(&mut self.state, &target.id, &drift.new_type)
                        .await
                    {
                        Ok(outcome) => ResizeReport::Committed(outcome),
                        Err(e) => {
                            error!(error = %e, "Resize aborted, baseline unchanged");
                            ResizeReport::Aborted {
                                instance_id: target.id.clone(),
                                to: drift.new_type.clone(),
                                instance_left_stopped: e.instance_left_stopped(),
                                error: e.to_string(),
                            }
                        }
                    }
                }
            };
            report.resize = Some(outcome);
        }
        report.drift = Some(drift);

        if !report.discovered.is_empty() {
            match self.directory.fetch_status(&report.discovered).await {
                Ok(statuses) => {
                    let health = self.health.reconcile(&report.discovered, &statuses).await;
                    report.health = Some(health);
                }
                Err(e) => {
                    warn!(error = %e, "Status fetch failed, skipping health reconcile");
                    report.status_error = Some(e.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Loop until `shutdown` flips or a desired-state re-read fails.
    ///
    /// Both the iteration body and the sleep between iterations are abandoned
    /// as soon as shutdown is signalled.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            filter = %self.filter(),
            baseline = self.state.last_applied_type(),
            interval_secs = self.settings.poll_interval_secs,
            "Reconciler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let span = info_span!("iteration", n = self.iterations + 1);
            tokio::select! {
                result = self.run_iteration().instrument(span) => {
                    let report = result?;
                    debug!(
                        report = %serde_json::to_string(&report).unwrap_or_default(),
                        "Iteration complete"
                    );
                }
                _ = shutdown.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval()) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(iterations = self.iterations, "Reconciler stopped");
        Ok(())
    }
}
