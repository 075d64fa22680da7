//! vmstate provider: the cloud instance API as seen by the reconciler.
//!
//! The reconciler only depends on two narrow capability traits:
//! `InstanceInventory` (describe calls) and `InstanceControl` (start, stop,
//! modify). `InMemoryProvider` implements both over a fake fleet for tests.
//! When the `aws` feature is enabled, `Ec2Provider` implements them against
//! EC2 using the ambient AWS credentials and region.

pub mod capability;
pub mod memory;

#[cfg(feature = "aws")]
pub mod ec2;

pub use capability::{InstanceControl, InstanceInventory, InstanceProvider};
pub use memory::{FakeInstance, InMemoryProvider, ProviderCall};

#[cfg(feature = "aws")]
pub use ec2::Ec2Provider;

use std::sync::Arc;

/// Create the provider backend compiled into this build.
///
/// Uses EC2 when the `aws` feature is enabled. There is no silent fallback:
/// a build without a real backend refuses to manage a fleet.
pub async fn create_provider() -> vmstate_core::Result<Arc<dyn InstanceProvider>> {
    #[cfg(feature = "aws")]
    {
        let provider = Ec2Provider::from_env().await;
        tracing::info!("Using EC2 provider (region={})", provider.region());
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "aws"))]
    {
        Err(vmstate_core::Error::Config(
            "no cloud provider backend compiled in (enable the `aws` feature)".into(),
        ))
    }
}
