//! Capability traits over the provider's instance-management API.

use async_trait::async_trait;
use vmstate_core::{InstanceStatus, ProviderError, Reservation, TagFilter};

/// Read-only view of the fleet.
#[async_trait]
pub trait InstanceInventory: Send + Sync {
    /// All instances carrying the tag, grouped by reservation, in provider order.
    async fn describe_instances(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<Reservation>, ProviderError>;

    /// Lifecycle state for the given ids. With `include_all` false the provider
    /// only reports running instances. An empty `ids` yields no rows.
    async fn describe_instance_status(
        &self,
        ids: &[String],
        include_all: bool,
    ) -> Result<Vec<InstanceStatus>, ProviderError>;
}

/// The start/stop/modify capability set. Resize and health logic are written
/// against this so a test double can stand in for the network.
#[async_trait]
pub trait InstanceControl: Send + Sync {
    async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<(), ProviderError>;

    async fn stop_instances(&self, ids: &[String], force: bool) -> Result<(), ProviderError>;

    async fn modify_instance_type(
        &self,
        id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError>;
}

/// Full provider handle: inventory plus control.
pub trait InstanceProvider: InstanceInventory + InstanceControl {}

impl<T: InstanceInventory + InstanceControl> InstanceProvider for T {}
