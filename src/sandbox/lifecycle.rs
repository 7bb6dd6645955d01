//! Container lifecycle: create, start and exec, each with its own error kind.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::image_name;

use super::engine::{ContainerEngine, ContainerSpec, ExecIo, ExecSpec};
use super::error::ExecError;
use super::policy::SessionPolicy;

/// Gauge of containers that were started and not yet reclaimed.
///
/// Starts at zero. Only `Lifecycle::start_container` increments it and only
/// a completed removal in teardown decrements it.
#[derive(Debug, Default)]
pub struct RunningContainers(AtomicUsize);

impl RunningContainers {
    pub fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement(&self) {
        // Saturate at zero
        let result = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if result.is_err() {
            tracing::error!("Running container gauge decremented below zero");
        }
    }
}

/// Creates, starts and execs into sandbox containers.
#[derive(Clone)]
pub struct Lifecycle {
    engine: Arc<dyn ContainerEngine>,
    running: Arc<RunningContainers>,
    base_image: String,
    network_mode: String,
}

impl Lifecycle {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        running: Arc<RunningContainers>,
        base_image: impl Into<String>,
        network_mode: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            running,
            base_image: base_image.into(),
            network_mode: network_mode.into(),
        }
    }

    pub fn image_name(&self, version: u32) -> String {
        image_name(&self.base_image, version)
    }

    /// Creates a container from image `version` with the session's memory cap.
    pub async fn create_container(
        &self,
        version: u32,
        policy: &SessionPolicy,
    ) -> Result<String, ExecError> {
        let spec = ContainerSpec {
            image: self.image_name(version),
            memory_limit: policy.memory_limit,
            network_mode: self.network_mode.clone(),
        };

        let id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|source| ExecError::ContainerCreate { source })?;

        debug!(container = %id, image = %spec.image, memory = ?spec.memory_limit, "Container created");
        Ok(id)
    }

    /// Starts a created container and counts it as running.
    pub async fn start_container(&self, id: &str) -> Result<(), ExecError> {
        self.engine
            .start_container(id)
            .await
            .map_err(|source| ExecError::ContainerStart { source })?;

        self.running.increment();
        debug!(container = %id, running = self.running.current(), "Container started");
        Ok(())
    }

    /// Creates an exec handle inside a started container.
    pub async fn exec_container(&self, id: &str, spec: &ExecSpec) -> Result<String, ExecError> {
        self.engine
            .create_exec(id, spec)
            .await
            .map_err(|source| ExecError::ContainerExec { source })
    }

    /// Starts an exec handle and attaches to its stdio.
    pub async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<ExecIo, ExecError> {
        self.engine
            .start_exec(exec_id, tty)
            .await
            .map_err(|source| ExecError::ExecStart { source })
    }
}
