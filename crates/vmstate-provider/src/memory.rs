//! In-memory provider: a fake fleet with a call journal.
//!
//! Behaves like the subset of EC2 the reconciler relies on:
//! - describe calls filter by tag and group by reservation in insertion order
//! - dry-run starts answer `DryRunOperation` when permitted and
//!   `UnauthorizedOperation` otherwise
//! - a stop can take a configurable number of status polls to settle
//! - modifying a non-stopped instance is rejected with `IncorrectInstanceState`

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use vmstate_core::{
    InstanceRef, InstanceStatus, LifecycleState, Operation, ProviderError, Reservation, TagFilter,
    DRY_RUN_OPERATION,
};

use crate::capability::{InstanceControl, InstanceInventory};

/// One instance in the fake fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeInstance {
    pub id: String,
    pub reservation_id: String,
    pub tags: Vec<(String, String)>,
    pub state: LifecycleState,
    pub instance_type: String,
    /// Status polls left before a `stopping` instance reports `stopped`.
    settle_polls: u32,
}

impl FakeInstance {
    pub fn new(
        id: impl Into<String>,
        reservation_id: impl Into<String>,
        state: LifecycleState,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            reservation_id: reservation_id.into(),
            tags: Vec::new(),
            state,
            instance_type: instance_type.into(),
            settle_polls: 0,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    fn matches(&self, filter: &TagFilter) -> bool {
        self.tags
            .iter()
            .any(|(k, v)| *k == filter.key && *v == filter.value)
    }
}

/// A call received by the provider, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProviderCall {
    DescribeInstances { filter: TagFilter },
    DescribeInstanceStatus { ids: Vec<String>, include_all: bool },
    Stop { ids: Vec<String>, force: bool },
    Modify { id: String, instance_type: String },
    Start { ids: Vec<String>, dry_run: bool },
}

impl ProviderCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::DescribeInstances { .. } => Operation::DescribeInstances,
            Self::DescribeInstanceStatus { .. } => Operation::DescribeInstanceStatus,
            Self::Stop { .. } => Operation::StopInstances,
            Self::Modify { .. } => Operation::ModifyInstanceAttribute,
            Self::Start { .. } => Operation::StartInstances,
        }
    }

    /// True for start, stop and modify calls.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Stop { .. } | Self::Modify { .. } | Self::Start { .. }
        )
    }
}

#[derive(Debug, Default)]
struct FleetState {
    instances: Vec<FakeInstance>,
    calls: Vec<ProviderCall>,
    failures: HashMap<Operation, VecDeque<ProviderError>>,
    start_denied: bool,
    dry_run_accepted: bool,
    stop_settle_polls: u32,
}

impl FleetState {
    fn instance_mut(&mut self, id: &str) -> Option<&mut FakeInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    fn take_failure(&mut self, operation: Operation) -> Option<ProviderError> {
        self.failures.get_mut(&operation).and_then(|q| q.pop_front())
    }

    fn require(&self, operation: Operation, id: &str) -> Result<(), ProviderError> {
        if self.instances.iter().any(|i| i.id == id) {
            Ok(())
        } else {
            Err(ProviderError::api(
                operation,
                "InvalidInstanceID.NotFound",
                format!("The instance ID '{}' does not exist", id),
            ))
        }
    }
}

/// Fake provider backed by an in-process fleet.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: Mutex<FleetState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a provider from a list of instances.
    pub fn with_instances(instances: impl IntoIterator<Item = FakeInstance>) -> Self {
        let provider = Self::new();
        for instance in instances {
            provider.add_instance(instance);
        }
        provider
    }

    pub fn add_instance(&self, instance: FakeInstance) {
        self.state.lock().instances.push(instance);
    }

    /// Make the next call of `operation` fail with `error`. Failures queue up
    /// and are consumed one per call.
    pub fn fail_next(&self, operation: Operation, error: ProviderError) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Deny start permission: dry runs answer `UnauthorizedOperation`.
    pub fn deny_start(&self) {
        self.state.lock().start_denied = true;
    }

    /// Answer dry-run starts with success instead of `DryRunOperation`.
    pub fn accept_dry_runs(&self) {
        self.state.lock().dry_run_accepted = true;
    }

    /// Number of status polls a stopped instance spends in `stopping`.
    pub fn set_stop_settle_polls(&self, polls: u32) {
        self.state.lock().stop_settle_polls = polls;
    }

    /// Force an instance into a state, bypassing the API.
    pub fn set_state(&self, id: &str, state: LifecycleState) {
        if let Some(instance) = self.state.lock().instance_mut(id) {
            instance.state = state;
            instance.settle_polls = 0;
        }
    }

    pub fn instance(&self, id: &str) -> Option<FakeInstance> {
        self.state.lock().instances.iter().find(|i| i.id == id).cloned()
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Start, stop and modify calls only.
    pub fn mutations(&self) -> Vec<ProviderCall> {
        self.calls().into_iter().filter(|c| c.is_mutation()).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl InstanceInventory for InMemoryProvider {
    async fn describe_instances(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<Reservation>, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::DescribeInstances {
            filter: filter.clone(),
        });
        if let Some(err) = state.take_failure(Operation::DescribeInstances) {
            return Err(err);
        }

        let mut reservations: Vec<Reservation> = Vec::new();
        for instance in state.instances.iter().filter(|i| i.matches(filter)) {
            let instance_ref = InstanceRef::new(instance.id.clone(), instance.state);
            match reservations
                .iter_mut()
                .find(|r| r.id.as_deref() == Some(instance.reservation_id.as_str()))
            {
                Some(reservation) => reservation.instances.push(instance_ref),
                None => reservations.push(Reservation {
                    id: Some(instance.reservation_id.clone()),
                    instances: vec![instance_ref],
                }),
            }
        }
        Ok(reservations)
    }

    async fn describe_instance_status(
        &self,
        ids: &[String],
        include_all: bool,
    ) -> Result<Vec<InstanceStatus>, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::DescribeInstanceStatus {
            ids: ids.to_vec(),
            include_all,
        });
        if let Some(err) = state.take_failure(Operation::DescribeInstanceStatus) {
            return Err(err);
        }

        let mut statuses = Vec::new();
        for instance in state.instances.iter_mut() {
            if !ids.contains(&instance.id) {
                continue;
            }
            if instance.state == LifecycleState::Stopping {
                if instance.settle_polls == 0 {
                    instance.state = LifecycleState::Stopped;
                } else {
                    instance.settle_polls -= 1;
                }
            }
            if include_all || instance.state.is_running() {
                statuses.push(InstanceStatus::new(instance.id.clone(), instance.state));
            }
        }
        Ok(statuses)
    }
}

#[async_trait]
impl InstanceControl for InMemoryProvider {
    async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<(), ProviderError> {
        let op = Operation::StartInstances;
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Start {
            ids: ids.to_vec(),
            dry_run,
        });
        if let Some(err) = state.take_failure(op) {
            return Err(err);
        }
        for id in ids {
            state.require(op, id)?;
        }

        if dry_run && state.dry_run_accepted && !state.start_denied {
            return Ok(());
        }
        if dry_run {
            return Err(if state.start_denied {
                ProviderError::api(
                    op,
                    "UnauthorizedOperation",
                    "You are not authorized to perform this operation.",
                )
            } else {
                ProviderError::api(
                    op,
                    DRY_RUN_OPERATION,
                    "Request would have succeeded, but DryRun flag is set.",
                )
            });
        }

        for id in ids {
            if let Some(instance) = state.instance_mut(id) {
                match instance.state {
                    LifecycleState::Terminated | LifecycleState::ShuttingDown => {
                        return Err(ProviderError::api(
                            op,
                            "IncorrectInstanceState",
                            format!(
                                "The instance '{}' is not in a state from which it can be started.",
                                id
                            ),
                        ));
                    }
                    _ => {
                        debug!("fake start {}", id);
                        instance.state = LifecycleState::Running;
                        instance.settle_polls = 0;
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop_instances(&self, ids: &[String], force: bool) -> Result<(), ProviderError> {
        let op = Operation::StopInstances;
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Stop {
            ids: ids.to_vec(),
            force,
        });
        if let Some(err) = state.take_failure(op) {
            return Err(err);
        }
        for id in ids {
            state.require(op, id)?;
        }

        let settle = state.stop_settle_polls;
        for id in ids {
            if let Some(instance) = state.instance_mut(id) {
                match instance.state {
                    LifecycleState::Stopped | LifecycleState::Terminated => {}
                    _ if settle == 0 => instance.state = LifecycleState::Stopped,
                    _ => {
                        instance.state = LifecycleState::Stopping;
                        instance.settle_polls = settle;
                    }
                }
            }
        }
        Ok(())
    }

    async fn modify_instance_type(
        &self,
        id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError> {
        let op = Operation::ModifyInstanceAttribute;
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Modify {
            id: id.to_string(),
            instance_type: instance_type.to_string(),
        });
        if let Some(err) = state.take_failure(op) {
            return Err(err);
        }
        state.require(op, id)?;

        if let Some(instance) = state.instance_mut(id) {
            if instance.state != LifecycleState::Stopped {
                return Err(ProviderError::api(
                    op,
                    "IncorrectInstanceState",
                    format!("The instance '{}' is not in the 'stopped' state.", id),
                ));
            }
            instance.instance_type = instance_type.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> InMemoryProvider {
        InMemoryProvider::with_instances([
            FakeInstance::new("i-1", "r-1", LifecycleState::Running, "t3.micro")
                .with_tag("group", "web"),
            FakeInstance::new("i-2", "r-2", LifecycleState::Stopped, "t3.micro")
                .with_tag("group", "web"),
            FakeInstance::new("i-3", "r-1", LifecycleState::Running, "t3.micro")
                .with_tag("group", "web"),
            FakeInstance::new("i-4", "r-3", LifecycleState::Running, "t3.micro")
                .with_tag("group", "db"),
        ])
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_describe_groups_by_reservation() {
        let provider = fleet();
        let reservations = provider
            .describe_instances(&TagFilter::new("group", "web"))
            .await
            .unwrap();

        assert_eq!(reservations.len(), 2);
        assert_eq!(reservations[0].id.as_deref(), Some("r-1"));
        let first: Vec<&str> = reservations[0].instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(first, vec!["i-1", "i-3"]);
        assert_eq!(reservations[1].instances[0].lifecycle_state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_describe_without_match() {
        let provider = fleet();
        let reservations = provider
            .describe_instances(&TagFilter::new("group", "cache"))
            .await
            .unwrap();
        assert!(reservations.is_empty());
    }

    #[tokio::test]
    async fn test_status_include_all() {
        let provider = fleet();
        let running_only = provider
            .describe_instance_status(&ids(&["i-1", "i-2"]), false)
            .await
            .unwrap();
        assert_eq!(running_only, vec![InstanceStatus::new("i-1", LifecycleState::Running)]);

        let all = provider
            .describe_instance_status(&ids(&["i-1", "i-2"]), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_answers() {
        let provider = fleet();
        let err = provider.start_instances(&ids(&["i-2"]), true).await.unwrap_err();
        assert!(err.is_dry_run_operation());
        assert_eq!(provider.instance("i-2").unwrap().state, LifecycleState::Stopped);

        provider.deny_start();
        let err = provider.start_instances(&ids(&["i-2"]), true).await.unwrap_err();
        assert_eq!(err.code(), Some("UnauthorizedOperation"));
    }

    #[tokio::test]
    async fn test_status_without_ids_is_empty() {
        let provider = fleet();
        let rows = provider.describe_instance_status(&[], true).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_dry_run_changes_nothing() {
        let provider = fleet();
        provider.accept_dry_runs();
        provider.start_instances(&ids(&["i-2"]), true).await.unwrap();
        assert_eq!(provider.instance("i-2").unwrap().state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_settles_after_polls() {
        let provider = fleet();
        provider.set_stop_settle_polls(2);
        provider.stop_instances(&ids(&["i-1"]), false).await.unwrap();

        let target = ids(&["i-1"]);
        for _ in 0..2 {
            let rows = provider.describe_instance_status(&target, true).await.unwrap();
            assert_eq!(rows[0].state, LifecycleState::Stopping);
        }
        let rows = provider.describe_instance_status(&target, true).await.unwrap();
        assert_eq!(rows[0].state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_modify_requires_stopped() {
        let provider = fleet();
        let err = provider.modify_instance_type("i-1", "t3.large").await.unwrap_err();
        assert_eq!(err.code(), Some("IncorrectInstanceState"));

        provider.modify_instance_type("i-2", "t3.large").await.unwrap();
        assert_eq!(provider.instance("i-2").unwrap().instance_type, "t3.large");
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let provider = fleet();
        provider.fail_next(
            Operation::StopInstances,
            ProviderError::Transport {
                operation: Operation::StopInstances,
                message: "boom".into(),
            },
        );
        assert!(provider.stop_instances(&ids(&["i-1"]), false).await.is_err());
        assert!(provider.stop_instances(&ids(&["i-1"]), false).await.is_ok());
        assert_eq!(provider.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_instance_rejected() {
        let provider = fleet();
        let err = provider.stop_instances(&ids(&["i-404"]), false).await.unwrap_err();
        assert_eq!(err.code(), Some("InvalidInstanceID.NotFound"));
    }
}
