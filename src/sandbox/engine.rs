//! Container engine boundary.
//!
//! The pipeline drives the engine exclusively through `ContainerEngine`, so
//! the Docker implementation and the test mock are interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

use super::error::EngineError;

/// Parameters for creating a single-use sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Fully qualified image name, `{base}:{version}`.
    pub image: String,
    /// Memory cap in bytes; `None` means unlimited.
    pub memory_limit: Option<i64>,
    /// Docker network mode, `none` for isolated sandboxes.
    pub network_mode: String,
}

/// Parameters for an exec inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub tty: bool,
}

impl ExecSpec {
    /// A `sh -c <script>` exec.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            cmd: vec!["sh".to_string(), "-c".to_string(), script.into()],
            attach_stdin: false,
            tty: false,
        }
    }

    /// Attaches stdin and a pseudo-terminal.
    #[must_use]
    pub fn interactive(mut self) -> Self {
        self.attach_stdin = true;
        self.tty = true;
        self
    }
}

/// Combined output stream of an exec. Stdout and stderr are not separated.
pub type OutputStream = BoxStream<'static, Result<Bytes, EngineError>>;

/// Writable stdin of an exec.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// An attached exec: its combined output and its stdin.
pub struct ExecIo {
    pub output: OutputStream,
    pub input: InputSink,
}

/// Point-in-time resource usage of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerUsage {
    /// Peak memory usage in bytes.
    pub peak_memory: u64,
    /// When the container was started, per the engine.
    pub started_at: DateTime<Utc>,
}

/// Artifacts removed by a prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub containers_deleted: Vec<String>,
    pub images_deleted: Vec<String>,
}

impl PruneReport {
    /// True when nothing was deleted.
    pub fn is_empty(&self) -> bool {
        self.containers_deleted.is_empty() && self.images_deleted.is_empty()
    }
}

/// Operations the core needs from a container runtime.
///
/// Implementations must be safe for concurrent use by many sessions.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Creates an exec in a running container and returns the exec id.
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError>;

    /// Starts an exec and attaches to its stdio.
    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<ExecIo, EngineError>;

    /// Collects peak memory and the start timestamp of a container.
    async fn usage(&self, id: &str) -> Result<ContainerUsage, EngineError>;

    /// Stops a container, giving it `grace_secs` before it is killed.
    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), EngineError>;

    /// Force-removes a container.
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// Builds an image tagged `tag` from a tar build context.
    ///
    /// Returns the last line of build output on success.
    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, EngineError>;

    /// Removes dangling containers and images.
    async fn prune(&self) -> Result<PruneReport, EngineError>;

    /// Removes a tagged image.
    async fn remove_image(&self, tag: &str) -> Result<(), EngineError>;
}
