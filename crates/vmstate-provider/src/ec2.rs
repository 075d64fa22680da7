//! EC2 backend using the AWS SDK and the ambient credential/region chain.

use async_trait::async_trait;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{AttributeValue, Filter};
use aws_sdk_ec2::Client;
use tracing::debug;
use vmstate_core::{
    InstanceRef, InstanceStatus, LifecycleState, Operation, ProviderError, Reservation, TagFilter,
};

use crate::capability::{InstanceControl, InstanceInventory};

/// EC2 instance API client.
#[derive(Debug, Clone)]
pub struct Ec2Provider {
    client: Client,
    region: Option<String>,
}

impl Ec2Provider {
    /// Build a client from the default AWS configuration chain
    /// (environment, profile, instance metadata).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let region = config.region().map(|r| r.to_string());
        Self {
            client: Client::new(&config),
            region,
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            region: None,
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or("unset")
    }
}

fn provider_error<E, R>(operation: Operation, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) => ProviderError::Api {
            operation,
            code: service.code().unwrap_or("Unknown").to_string(),
            message: service.message().unwrap_or_default().to_string(),
        },
        None => ProviderError::Transport {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

/// DescribeInstanceStatus rejects requests naming more ids than this.
const MAX_STATUS_IDS: usize = 100;

fn status_batches(ids: &[String]) -> std::slice::Chunks<'_, String> {
    ids.chunks(MAX_STATUS_IDS)
}

fn lifecycle(state: Option<&aws_sdk_ec2::types::InstanceState>) -> LifecycleState {
    state
        .and_then(|s| s.name())
        .map(|name| LifecycleState::from_provider(name.as_str()))
        .unwrap_or(LifecycleState::Unknown)
}

#[async_trait]
impl InstanceInventory for Ec2Provider {
    async fn describe_instances(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<Reservation>, ProviderError> {
        let op = Operation::DescribeInstances;
        let mut reservations = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .describe_instances()
                .filters(
                    Filter::builder()
                        .name(filter.provider_filter_name())
                        .values(filter.value.clone())
                        .build(),
                )
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| provider_error(op, e))?;

            for reservation in resp.reservations() {
                let instances = reservation
                    .instances()
                    .iter()
                    .filter_map(|i| {
                        i.instance_id()
                            .map(|id| InstanceRef::new(id, lifecycle(i.state())))
                    })
                    .collect();
                reservations.push(Reservation {
                    id: reservation.reservation_id().map(str::to_string),
                    instances,
                });
            }

            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("{} returned {} reservations", op, reservations.len());
        Ok(reservations)
    }

    async fn describe_instance_status(
        &self,
        ids: &[String],
        include_all: bool,
    ) -> Result<Vec<InstanceStatus>, ProviderError> {
        let op = Operation::DescribeInstanceStatus;
        let mut statuses = Vec::new();

        for batch in status_batches(ids) {
            let mut next_token: Option<String> = None;
            loop {
                let resp = self
                    .client
                    .describe_instance_status()
                    .set_instance_ids(Some(batch.to_vec()))
                    .include_all_instances(include_all)
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|e| provider_error(op, e))?;

                statuses.extend(resp.instance_statuses().iter().filter_map(|s| {
                    s.instance_id()
                        .map(|id| InstanceStatus::new(id, lifecycle(s.instance_state())))
                }));

                match resp.next_token() {
                    Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                    _ => break,
                }
            }
        }

        Ok(statuses)
    }
}

#[async_trait]
impl InstanceControl for Ec2Provider {
    async fn start_instances(&self, ids: &[String], dry_run: bool) -> Result<(), ProviderError> {
        self.client
            .start_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| provider_error(Operation::StartInstances, e))
    }

    async fn stop_instances(&self, ids: &[String], force: bool) -> Result<(), ProviderError> {
        self.client
            .stop_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .force(force)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| provider_error(Operation::StopInstances, e))
    }

    async fn modify_instance_type(
        &self,
        id: &str,
        instance_type: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .modify_instance_attribute()
            .instance_id(id)
            .instance_type(AttributeValue::builder().value(instance_type).build())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| provider_error(Operation::ModifyInstanceAttribute, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ids_split_into_batches() {
        let ids: Vec<String> = (0..250).map(|n| format!("i-{:04}", n)).collect();

        let batches: Vec<&[String]> = status_batches(&ids).collect();

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batches[1][0], "i-0100");
        assert_eq!(batches.concat(), ids);
    }

    #[test]
    fn test_small_group_is_one_batch() {
        let ids = vec!["i-1".to_string(), "i-2".to_string()];
        assert_eq!(status_batches(&ids).count(), 1);
    }

    #[test]
    fn test_lifecycle_without_state_is_unknown() {
        assert_eq!(lifecycle(None), LifecycleState::Unknown);
    }
}
