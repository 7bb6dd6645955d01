//! Telemetry and teardown.
//!
//! `Teardown::terminate` never fails: usage is snapshotted and forwarded to
//! the statistics recorder, then the container is stopped and removed. Every
//! failure along the way is logged and the remaining steps still run.
//!
//! `SessionGuard` owns a session's container and guarantees exactly one
//! teardown per container: finishing consumes the guard, and a guard dropped
//! without finishing schedules the teardown itself.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::engine::ContainerEngine;
use super::error::ExecError;
use super::lifecycle::RunningContainers;
use super::services::StatsRecorder;

/// Shared teardown machinery, cloned into every session.
#[derive(Clone)]
pub struct Teardown {
    engine: Arc<dyn ContainerEngine>,
    stats: Arc<dyn StatsRecorder>,
    running: Arc<RunningContainers>,
    stop_grace_secs: i64,
}

impl Teardown {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        stats: Arc<dyn StatsRecorder>,
        running: Arc<RunningContainers>,
        stop_grace_secs: i64,
    ) -> Self {
        Self {
            engine,
            stats,
            running,
            stop_grace_secs,
        }
    }

    /// Snapshots usage of `container` and forwards it to the recorder.
    ///
    /// Elapsed time is measured from the container's start, so it includes
    /// the injection phase.
    pub async fn record_usage(&self, identity: &str, container: &str) -> Result<(), ExecError> {
        let usage = self
            .engine
            .usage(container)
            .await
            .map_err(ExecError::telemetry)?;

        let elapsed_ms = u64::try_from((Utc::now() - usage.started_at).num_milliseconds()).unwrap_or(0);

        self.stats
            .log_execution_stats(identity, elapsed_ms, usage.peak_memory)
            .await
            .map_err(ExecError::telemetry)?;

        debug!(container, identity, elapsed_ms, peak_memory = usage.peak_memory, "Usage recorded");
        Ok(())
    }

    /// Records usage, stops and removes `container`.
    ///
    /// `started` tells whether the container was counted as running; only
    /// then is usage recorded and the gauge decremented once removal completes.
    pub async fn terminate(&self, identity: &str, container: &str, started: bool) {
        if started {
            if let Err(e) = self.record_usage(identity, container).await {
                warn!(container, error = %e, "Failed to record execution statistics");
            }

            if let Err(e) = self.engine.stop_container(container, self.stop_grace_secs).await {
                if !e.is_gone() {
                    warn!(container, error = %e, "Failed to stop container, removing anyway");
                }
            }
        }

        match self.engine.remove_container(container).await {
            Ok(()) => debug!(container, "Container removed"),
            Err(e) if e.is_gone() => debug!(container, "Container was already removed"),
            Err(e) => {
                error!(container, error = %e, "Failed to remove container");
                return;
            }
        }

        if started {
            self.running.decrement();
        }
    }
}

/// Single-owner handle on a session's container.
pub struct SessionGuard {
    teardown: Teardown,
    identity: String,
    container: String,
    started: bool,
    finished: bool,
}

impl SessionGuard {
    pub fn new(teardown: Teardown, identity: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            teardown,
            identity: identity.into(),
            container: container.into(),
            started: false,
            finished: false,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Marks the container as started (counted in the running gauge).
    pub fn mark_started(&mut self) {
        self.started = true;
    }

    /// Tears the container down and waits for it.
    pub async fn finish(mut self) {
        self.finished = true;
        self.teardown
            .terminate(&self.identity, &self.container, self.started)
            .await;
    }

    /// Tears the container down in the background.
    ///
    /// Used on failure paths so a teardown problem cannot mask the session's
    /// original error.
    pub fn finish_in_background(mut self) {
        self.finished = true;
        self.spawn_teardown();
    }

    fn spawn_teardown(&self) {
        let teardown = self.teardown.clone();
        let identity = self.identity.clone();
        let container = self.container.clone();
        let started = self.started;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    teardown.terminate(&identity, &container, started).await;
                });
            }
            Err(_) => error!(
                container = %self.container,
                "No async runtime available, container leaked"
            ),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(container = %self.container, "Session dropped before teardown, reclaiming container");
            self.finished = true;
            self.spawn_teardown();
        }
    }
}
