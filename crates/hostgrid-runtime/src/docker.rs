//! Docker engine adapter over bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, HostConfig};
use futures_util::TryStreamExt;
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};
use crate::port::ContainerRuntime;
use crate::types::{ContainerInfo, ContainerSpec, ContainerState};

/// Engine calls the error mapping distinguishes.
#[derive(Debug, Clone, Copy)]
enum Call {
    Pull,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
}

fn map_docker_err(call: Call, err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => match (call, status_code) {
            (Call::Pull, _) | (Call::Create, 404) => RuntimeError::Image(message),
            (_, 404) => RuntimeError::NotFound(message),
            (Call::Create, 409) => RuntimeError::NameConflict(message),
            (_, status) => RuntimeError::Engine { status, message },
        },
        DockerError::RequestTimeoutError => RuntimeError::Timeout(format!("{call:?}")),
        // Anything that is not an engine response is a transport failure.
        other => RuntimeError::Connection(other.to_string()),
    }
}

/// Split an image reference into the `fromImage`/`tag` pair the pull API
/// expects. An untagged reference means `latest`; digests are passed whole.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn container_state(status: Option<ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ => ContainerState::Unknown,
    }
}

fn container_info(response: ContainerInspectResponse) -> ContainerInfo {
    let config = response.config.unwrap_or_default();
    ContainerInfo {
        id: response.id.unwrap_or_default(),
        // The engine reports names with a leading slash.
        name: response
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: config.image.unwrap_or_default(),
        state: container_state(response.state.and_then(|s| s.status)),
        labels: config.labels.unwrap_or_default().into_iter().collect(),
    }
}

/// [`ContainerRuntime`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(%image, "image present");
                return Ok(());
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(map_docker_err(Call::Inspect, e)),
        }

        info!(%image, "pulling image");
        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let _progress: Vec<_> = self
            .docker
            .create_image(Some(options), None, None)
            .try_collect()
            .await
            .map_err(|e| map_docker_err(Call::Pull, e))?;
        info!(%image, "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            ..Default::default()
        };

        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            [(format!("{}/tcp", spec.port), HashMap::new())]
                .into_iter()
                .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(
                spec.labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_docker_err(Call::Create, e))?;

        debug!(name = %spec.name, id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(()) => Ok(()),
            // 304: already started.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_docker_err(Call::Start, e)),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_docker_err(Call::Stop, e)),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_docker_err(Call::Remove, e))
    }

    async fn inspect_container(&self, id_or_name: &str) -> RuntimeResult<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_docker_err(Call::Inspect, e))?;
        Ok(container_info(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> DockerError {
        DockerError::DockerResponseServerError {
            status_code,
            message: "engine says no".to_string(),
        }
    }

    #[test]
    fn image_ref_splitting() {
        assert_eq!(split_image_ref("nginx:alpine"), ("nginx", "alpine"));
        assert_eq!(split_image_ref("nginx"), ("nginx", "latest"));
        assert_eq!(
            split_image_ref("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_ref("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app", "v2")
        );
        assert_eq!(split_image_ref("app@sha256:abcd"), ("app@sha256:abcd", ""));
    }

    #[test]
    fn error_mapping_by_call() {
        assert!(matches!(
            map_docker_err(Call::Create, server_error(409)),
            RuntimeError::NameConflict(_)
        ));
        assert!(matches!(
            map_docker_err(Call::Create, server_error(404)),
            RuntimeError::Image(_)
        ));
        assert!(matches!(
            map_docker_err(Call::Remove, server_error(404)),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            map_docker_err(Call::Pull, server_error(500)),
            RuntimeError::Image(_)
        ));
        assert_eq!(
            map_docker_err(Call::Start, server_error(500)),
            RuntimeError::Engine {
                status: 500,
                message: "engine says no".to_string()
            }
        );
        assert!(map_docker_err(Call::Stop, DockerError::RequestTimeoutError).is_transient());
    }

    #[test]
    fn inspect_response_conversion() {
        let response = ContainerInspectResponse {
            id: Some("abc123".to_string()),
            name: Some("/blog-1a2b3c4d".to_string()),
            state: Some(bollard::models::ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                ..Default::default()
            }),
            ..Default::default()
        };
        let info = container_info(response);
        assert_eq!(info.name, "blog-1a2b3c4d");
        assert_eq!(info.state, ContainerState::Exited);
        assert!(info.labels.is_empty());
    }
}
