//! Docker Engine API implementation of the engine capability traits

use super::{ContainerEngine, ContainerInspector, EngineError, EventStream};
use crate::models::{
    ContainerEvent, ContainerSnapshot, ContainerState, NetworkResource, ServiceResource,
    VolumeResource,
};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EventMessage, EventMessageTypeEnum, MountPoint,
};
use bollard::network::ListNetworksOptions;
use bollard::service::ListServicesOptions;
use bollard::system::EventsOptions;
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Engine backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the standard `DOCKER_HOST` / local socket defaults and
    /// verify the daemon answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_error)?;
        docker.ping().await.map_err(map_error)?;
        info!("Connected to Docker engine");
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerInspector for DockerEngine {
    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, EngineError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;
        Ok(snapshot_from_inspect(response))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, EngineError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;
        Ok(containers.into_iter().map(snapshot_from_summary).collect())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn subscribe_events(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|result| async move {
                match result {
                    Ok(message) => event_from_message(message).map(Ok),
                    Err(e) => Some(Err(map_error(e))),
                }
            })
            .boxed()
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkResource>, EngineError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(map_error)?;

        Ok(networks
            .into_iter()
            .map(|network| NetworkResource {
                id: network.id.unwrap_or_default(),
                name: network.name.unwrap_or_default(),
                labels: network.labels.unwrap_or_default(),
                containers: network
                    .containers
                    .map(|attached| attached.into_keys().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        self.docker.remove_network(id).await.map_err(map_error)
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeResource>, EngineError> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(map_error)?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| VolumeResource {
                name: volume.name,
                labels: volume.labels,
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(map_error)
    }

    async fn list_services(&self) -> Result<Vec<ServiceResource>, EngineError> {
        match self
            .docker
            .list_services(None::<ListServicesOptions<String>>)
            .await
        {
            Ok(services) => Ok(services
                .into_iter()
                .map(|service| {
                    let spec = service.spec.unwrap_or_default();
                    ServiceResource {
                        id: service.id.unwrap_or_default(),
                        name: spec.name.unwrap_or_default(),
                        labels: spec.labels.unwrap_or_default(),
                    }
                })
                .collect()),
            // Not a swarm manager
            Err(BollardError::DockerResponseServerError {
                status_code: 503,
                message,
            }) => {
                debug!(message = %message, "Swarm mode inactive, no services to list");
                Ok(Vec::new())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove_service(&self, id: &str) -> Result<(), EngineError> {
        self.docker.delete_service(id).await.map_err(map_error)
    }
}

fn map_error(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            status: status_code,
            message,
        },
        other => EngineError::Unavailable(other.to_string()),
    }
}

fn event_from_message(message: EventMessage) -> Option<ContainerEvent> {
    if let Some(typ) = message.typ {
        if typ != EventMessageTypeEnum::CONTAINER {
            return None;
        }
    }

    let actor = message.actor?;
    let id = actor.id?;

    Some(ContainerEvent {
        id,
        action: message.action.unwrap_or_default(),
        time_nano: message.time_nano,
        attributes: actor.attributes.unwrap_or_default(),
    })
}

fn volume_names(mounts: Option<Vec<MountPoint>>) -> Vec<String> {
    mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|mount| mount.name)
        .filter(|name| !name.is_empty())
        .collect()
}

fn snapshot_from_summary(summary: ContainerSummary) -> ContainerSnapshot {
    ContainerSnapshot {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.into_iter().next())
            .unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        state: ContainerState::parse(summary.state.as_deref().unwrap_or_default()),
        created: summary
            .created
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        mounts: volume_names(summary.mounts),
        networks: summary
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default(),
    }
}

fn snapshot_from_inspect(response: ContainerInspectResponse) -> ContainerSnapshot {
    let state = response
        .state
        .and_then(|state| state.status)
        .map(|status| ContainerState::parse(&status.to_string()))
        .unwrap_or_else(|| ContainerState::Other(String::new()));

    ContainerSnapshot {
        id: response.id.unwrap_or_default(),
        name: response.name.unwrap_or_default(),
        labels: response
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default(),
        state,
        created: response
            .created
            .and_then(|created| DateTime::parse_from_rfc3339(&created).ok())
            .map(|created| created.with_timezone(&Utc)),
        mounts: volume_names(response.mounts),
        networks: response
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EventActor;

    #[test]
    fn test_event_from_message_container() {
        let message = EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some("die".to_string()),
            actor: Some(EventActor {
                id: Some("abc123".to_string()),
                attributes: Some(HashMap::from([(
                    "name".to_string(),
                    "runner-1-build".to_string(),
                )])),
            }),
            time_nano: Some(1_700_000_000_000_000_000),
            ..Default::default()
        };

        let event = event_from_message(message).unwrap();
        assert_eq!(event.id, "abc123");
        assert!(event.is_terminal());
        assert_eq!(event.attributes["name"], "runner-1-build");
    }

    #[test]
    fn test_event_from_message_skips_other_types() {
        let message = EventMessage {
            typ: Some(EventMessageTypeEnum::NETWORK),
            action: Some("destroy".to_string()),
            actor: Some(EventActor {
                id: Some("net1".to_string()),
                attributes: None,
            }),
            ..Default::default()
        };

        assert!(event_from_message(message).is_none());
    }

    #[test]
    fn test_snapshot_from_summary() {
        let summary = ContainerSummary {
            id: Some("c1".to_string()),
            names: Some(vec!["/runner-7-build".to_string()]),
            state: Some("exited".to_string()),
            created: Some(1_700_000_000),
            mounts: Some(vec![
                MountPoint {
                    name: Some("cache".to_string()),
                    ..Default::default()
                },
                MountPoint {
                    name: None,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let snapshot = snapshot_from_summary(summary);
        assert_eq!(snapshot.trimmed_name(), "runner-7-build");
        assert_eq!(snapshot.state, ContainerState::Exited);
        assert_eq!(snapshot.mounts, vec!["cache".to_string()]);
        assert!(snapshot.networks.is_empty());
        assert!(snapshot.created.is_some());
    }

    #[test]
    fn test_map_error_not_found() {
        let err = map_error(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        });
        assert!(err.is_not_found());

        let err = map_error(BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        });
        assert!(matches!(err, EngineError::Api { status: 409, .. }));
    }
}
