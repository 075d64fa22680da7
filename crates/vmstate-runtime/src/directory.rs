//! Instance directory: tag-based discovery and status fetch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vmstate_core::{InstanceRef, InstanceStatus, Operation, ProviderError, Reservation, TagFilter};
use vmstate_provider::InstanceInventory;

use crate::call::bounded;

/// Result of one discovery pass, in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub reservations: Vec<Reservation>,
}

impl Discovery {
    pub fn instances(&self) -> impl Iterator<Item = &InstanceRef> {
        self.reservations.iter().flat_map(|r| r.instances.iter())
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.instances().map(|i| i.id.clone()).collect()
    }

    /// The instance a resize acts on: the first one discovered.
    pub fn representative(&self) -> Option<&InstanceRef> {
        self.instances().next()
    }

    pub fn len(&self) -> usize {
        self.instances().count()
    }

    pub fn is_empty(&self) -> bool {
        self.representative().is_none()
    }
}

/// Looks up the managed group through the provider's inventory API.
pub struct InstanceDirectory<P: ?Sized> {
    provider: Arc<P>,
    filter: TagFilter,
    call_timeout: Duration,
}

impl<P: InstanceInventory + ?Sized> InstanceDirectory<P> {
    pub fn new(provider: Arc<P>, filter: TagFilter, call_timeout: Duration) -> Self {
        Self {
            provider,
            filter,
            call_timeout,
        }
    }

    pub fn filter(&self) -> &TagFilter {
        &self.filter
    }

    /// Find every instance carrying the tag.
    pub async fn discover(&self) -> Result<Discovery, ProviderError> {
        let reservations = bounded(
            Operation::DescribeInstances,
            self.call_timeout,
            self.provider.describe_instances(&self.filter),
        )
        .await?;

        for reservation in &reservations {
            let ids: Vec<&str> = reservation.instances.iter().map(|i| i.id.as_str()).collect();
            info!(
                reservation = reservation.id.as_deref().unwrap_or("-"),
                instances = ?ids,
                "Discovered reservation"
            );
        }

        Ok(Discovery { reservations })
    }

    /// Fetch lifecycle state for `ids`, stopped instances included.
    pub async fn fetch_status(&self, ids: &[String]) -> Result<Vec<InstanceStatus>, ProviderError> {
        let statuses = bounded(
            Operation::DescribeInstanceStatus,
            self.call_timeout,
            self.provider.describe_instance_status(ids, true),
        )
        .await?;

        if statuses.len() != ids.len() {
            warn!(
                requested = ids.len(),
                returned = statuses.len(),
                "Status count mismatch"
            );
        }

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmstate_core::LifecycleState;
    use vmstate_provider::{FakeInstance, InMemoryProvider, ProviderCall};

    fn member(id: &str, reservation: &str, state: LifecycleState) -> FakeInstance {
        FakeInstance::new(id, reservation, state, "t3.micro").with_tag("app", "api")
    }

    fn directory(provider: Arc<InMemoryProvider>) -> InstanceDirectory<InMemoryProvider> {
        InstanceDirectory::new(provider, TagFilter::new("app", "api"), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_discover_preserves_provider_order() {
        let provider = Arc::new(InMemoryProvider::with_instances([
            member("i-b", "r-1", LifecycleState::Running),
            member("i-a", "r-2", LifecycleState::Stopped),
            member("i-c", "r-1", LifecycleState::Running),
            FakeInstance::new("i-x", "r-3", LifecycleState::Running, "t3.micro")
                .with_tag("app", "web"),
        ]));

        let discovery = directory(provider).discover().await.unwrap();
        assert_eq!(discovery.instance_ids(), vec!["i-b", "i-c", "i-a"]);
        assert_eq!(discovery.representative().unwrap().id, "i-b");
        assert_eq!(discovery.len(), 3);
        assert_eq!(discovery.reservations.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_empty_group() {
        let provider = Arc::new(InMemoryProvider::new());
        let discovery = directory(provider).discover().await.unwrap();
        assert!(discovery.is_empty());
        assert!(discovery.representative().is_none());
    }

    #[tokio::test]
    async fn test_discover_error_surfaces() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.fail_next(
            Operation::DescribeInstances,
            ProviderError::api(Operation::DescribeInstances, "RequestLimitExceeded", "slow down"),
        );
        let err = directory(provider).discover().await.unwrap_err();
        assert_eq!(err.code(), Some("RequestLimitExceeded"));
    }

    #[tokio::test]
    async fn test_fetch_status_includes_stopped() {
        let provider = Arc::new(InMemoryProvider::with_instances([member(
            "i-1",
            "r-1",
            LifecycleState::Stopped,
        )]));
        let statuses = directory(provider.clone())
            .fetch_status(&["i-1".to_string()])
            .await
            .unwrap();
        assert_eq!(statuses, vec![InstanceStatus::new("i-1", LifecycleState::Stopped)]);
        assert!(provider.calls().contains(&ProviderCall::DescribeInstanceStatus {
            ids: vec!["i-1".to_string()],
            include_all: true,
        }));
    }
}
