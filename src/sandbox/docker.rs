use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    PruneContainersOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, PruneImagesOptions, RemoveImageOptions};
use bollard::service::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, info};

use super::engine::{
    ContainerEngine, ContainerSpec, ContainerUsage, ExecIo, ExecSpec, PruneReport,
};
use super::error::EngineError;

/// `ContainerEngine` backed by the local Docker daemon.
///
/// `Docker` is a cheaply clonable, stateless client; one instance is shared
/// by every session.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local daemon and verifies it answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self { docker })
    }

    fn container_name() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("codebox-{}", &id[..12])
    }
}

/// Builds the Docker config for a sandbox container.
///
/// Stdio is attached and a TTY allocated so programs behave as if run from a
/// terminal; networking is disabled.
fn container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
    ContainerConfig {
        image: Some(spec.image.clone()),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        open_stdin: Some(true),
        network_disabled: Some(true),
        tty: Some(true),
        host_config: Some(HostConfig {
            memory: spec.memory_limit,
            network_mode: Some(spec.network_mode.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn parse_started_at(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::protocol(format!("invalid StartedAt '{raw}': {e}")))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let name = Self::container_name();
        debug!(container = %name, image = %spec.image, "Creating container");

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                container_config(spec),
            )
            .await?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(spec.cmd.clone()),
                    attach_stdin: Some(spec.attach_stdin),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(spec.tty),
                    ..Default::default()
                },
            )
            .await?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<ExecIo, EngineError> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty,
                    output_capacity: None,
                }),
            )
            .await?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecIo {
                output: output
                    .map(|chunk| chunk.map(LogOutput::into_bytes).map_err(EngineError::from))
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => {
                Err(EngineError::protocol("exec started detached, expected attached stdio"))
            }
        }
    }

    async fn usage(&self, id: &str) -> Result<ContainerUsage, EngineError> {
        let stats = self
            .docker
            .stats(
                id,
                Some(StatsOptions {
                    stream: false,
                    one_shot: true,
                }),
            )
            .next()
            .await
            .ok_or_else(|| EngineError::protocol("stats stream ended without a sample"))??;

        // cgroup v2 hosts do not report max_usage
        let peak_memory = stats
            .memory_stats
            .max_usage
            .or(stats.memory_stats.usage)
            .unwrap_or(0);

        let inspection = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let started_at = inspection
            .state
            .and_then(|state| state.started_at)
            .ok_or_else(|| EngineError::protocol("container has no StartedAt"))?;

        Ok(ContainerUsage {
            peak_memory,
            started_at: parse_started_at(&started_at)?,
        })
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), EngineError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, EngineError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context));
        let mut last_output = String::new();

        while let Some(chunk) = stream.next().await {
            let output = chunk?;
            if let Some(text) = &output.stream {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    debug!(tag, "{trimmed}");
                    last_output = trimmed.to_string();
                }
            } else if let Some(error) = &output.error {
                return Err(EngineError::protocol(format!("build error: {error}")));
            } else if let Some(message) = output.error_detail.as_ref().and_then(|d| d.message.as_ref()) {
                return Err(EngineError::protocol(format!("build error: {message}")));
            }
        }

        info!(tag, "Image build stream finished");
        Ok(last_output)
    }

    async fn prune(&self) -> Result<PruneReport, EngineError> {
        let containers = self
            .docker
            .prune_containers(None::<PruneContainersOptions<String>>)
            .await?;
        let images = self
            .docker
            .prune_images(None::<PruneImagesOptions<String>>)
            .await?;

        Ok(PruneReport {
            containers_deleted: containers.containers_deleted.unwrap_or_default(),
            images_deleted: images
                .images_deleted
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| item.deleted.or(item.untagged))
                .collect(),
        })
    }

    async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
        self.docker
            .remove_image(tag, None::<RemoveImageOptions>, None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_config_isolates_network() {
        let spec = ContainerSpec {
            image: "online_compiler:3".to_string(),
            memory_limit: Some(100 * 1024 * 1024),
            network_mode: "none".to_string(),
        };
        let config = container_config(&spec);

        assert_eq!(config.image.as_deref(), Some("online_compiler:3"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.tty, Some(true));
        assert_eq!(config.open_stdin, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(100 * 1024 * 1024));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
    }

    #[test]
    fn test_container_config_without_memory_cap() {
        let spec = ContainerSpec {
            image: "online_compiler:1".to_string(),
            memory_limit: None,
            network_mode: "none".to_string(),
        };
        assert_eq!(container_config(&spec).host_config.unwrap().memory, None);
    }

    #[test]
    fn test_container_names_are_unique() {
        let a = DockerEngine::container_name();
        let b = DockerEngine::container_name();
        assert!(a.starts_with("codebox-"));
        assert_eq!(a.len(), "codebox-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_started_at() {
        let parsed = parse_started_at("2024-03-01T10:00:00.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_709_287_200);
        assert!(parse_started_at("0001-01-01").is_err());
    }
}
