//! Execution pipeline.
//!
//! A session moves strictly through resolve -> create -> start -> inject ->
//! run -> finalize. Exactly one container is created per session and it is
//! always handed to a `SessionGuard`, so every path that created a container
//! reaches teardown exactly once.

use anyhow::Result;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

use super::engine::{ContainerEngine, ExecIo, ExecSpec, OutputStream};
use super::error::ExecError;
use super::inject::inject_file;
use super::language::Language;
use super::lifecycle::{Lifecycle, RunningContainers};
use super::policy::{Caller, SessionPolicy};
use super::services::{ImageCatalog, StatsRecorder};
use super::teardown::{SessionGuard, Teardown};

/// One execution request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub caller: Caller,
    pub program: String,
    pub language: Language,
    /// Image version to run on; `None` uses the active image
    pub version: Option<u32>,
    pub input: Option<String>,
}

/// Session phases, reported when a session fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving,
    Creating,
    Starting,
    Injecting,
    Running,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolving => write!(f, "resolving"),
            Self::Creating => write!(f, "creating"),
            Self::Starting => write!(f, "starting"),
            Self::Injecting => write!(f, "injecting"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Runs untrusted programs in single-use containers.
///
/// Cheap to clone; clones share the engine client and the running gauge.
#[derive(Clone)]
pub struct Runner {
    lifecycle: Lifecycle,
    teardown: Teardown,
    catalog: Arc<dyn ImageCatalog>,
    running: Arc<RunningContainers>,
    memory_limit: i64,
}

impl Runner {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        catalog: Arc<dyn ImageCatalog>,
        stats: Arc<dyn StatsRecorder>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let running = Arc::new(RunningContainers::default());
        Ok(Self {
            lifecycle: Lifecycle::new(
                engine.clone(),
                running.clone(),
                config.base_image.clone(),
                config.network_mode.clone(),
            ),
            teardown: Teardown::new(engine, stats, running.clone(), config.stop_grace_secs),
            catalog,
            running,
            memory_limit: config.memory_limit()?,
        })
    }

    /// Containers started and not yet reclaimed, across all sessions.
    pub fn running_containers(&self) -> usize {
        self.running.current()
    }

    /// Runs one program and returns its combined output, echoed input removed.
    pub async fn run(&self, request: RunRequest) -> Result<String, ExecError> {
        let identity = request.caller.identity().to_string();

        let version = self
            .resolve(&request)
            .await
            .inspect_err(|e| warn!(identity = %identity, phase = %Phase::Resolving, kind = %e.kind(), "{e}"))?;

        let policy = SessionPolicy::for_caller(&request.caller, &request.language, self.memory_limit);
        info!(
            identity = %identity,
            version,
            language = %request.language,
            unrestricted = request.caller.is_unrestricted(),
            "Starting session"
        );

        let container = self
            .lifecycle
            .create_container(version, &policy)
            .await
            .inspect_err(|e| warn!(identity = %identity, phase = %Phase::Creating, kind = %e.kind(), "{e}"))?;
        let mut guard = SessionGuard::new(self.teardown.clone(), identity.clone(), container);

        match self.execute(&mut guard, &request, &policy).await {
            Ok(output) => {
                guard.finish().await;
                info!(identity = %identity, bytes = output.len(), "Session finished");
                Ok(output)
            }
            Err((phase, e)) => {
                warn!(identity = %identity, container = guard.container(), %phase, kind = %e.kind(), "{e}");
                guard.finish_in_background();
                Err(e)
            }
        }
    }

    /// Picks the image version and checks the language is registered on it.
    async fn resolve(&self, request: &RunRequest) -> Result<u32, ExecError> {
        let version = match request.version {
            Some(version) => version,
            None => self
                .catalog
                .active_image_version()
                .await
                .map_err(ExecError::internal)?
                .ok_or(ExecError::NoActiveImage)?,
        };

        let registered = self
            .catalog
            .language_is_registered(version, &request.language.name)
            .await
            .map_err(ExecError::internal)?;

        if registered {
            Ok(version)
        } else {
            Err(ExecError::LanguageNotFound {
                language: request.language.name.clone(),
                version,
            })
        }
    }

    async fn execute(
        &self,
        guard: &mut SessionGuard,
        request: &RunRequest,
        policy: &SessionPolicy,
    ) -> Result<String, (Phase, ExecError)> {
        let container = guard.container().to_string();

        self.lifecycle
            .start_container(&container)
            .await
            .map_err(|e| (Phase::Starting, e))?;
        guard.mark_started();

        inject_file(
            &self.lifecycle,
            &container,
            &request.language.main_file,
            &request.program,
        )
        .await
        .map_err(|e| (Phase::Injecting, e))?;

        let input = request.input.as_deref().unwrap_or("");
        let raw = self
            .run_program(&container, &request.language, input, policy.time_limit)
            .await
            .map_err(|e| (Phase::Running, e))?;

        Ok(strip_echo(&raw, input))
    }

    /// Starts the language's command with a TTY, feeds `input` and captures
    /// output until the stream ends or `time_limit` elapses.
    async fn run_program(
        &self,
        container: &str,
        language: &Language,
        input: &str,
        time_limit: Option<Duration>,
    ) -> Result<String, ExecError> {
        let spec = ExecSpec::shell(language.start_command.clone()).interactive();
        let exec_id = self.lifecycle.exec_container(container, &spec).await?;
        let ExecIo { output, input: mut stdin } = self.lifecycle.start_exec(&exec_id, true).await?;

        // The deadline also covers the stdin write; stdin stays open until
        // the output ends.
        let session = async move {
            stdin
                .write_all(format!("{input}\n").as_bytes())
                .await
                .map_err(|e| ExecError::Stream { source: e.into() })?;
            stdin
                .flush()
                .await
                .map_err(|e| ExecError::Stream { source: e.into() })?;
            let captured = capture(output).await?;
            drop(stdin);
            Ok::<_, ExecError>(captured)
        };

        let captured = match time_limit {
            Some(limit) => tokio::time::timeout(limit, session)
                .await
                .map_err(|_| ExecError::timeout(limit))??,
            None => session.await?,
        };

        debug!(container, bytes = captured.len(), "Run stream ended");
        Ok(String::from_utf8_lossy(&captured).into_owned())
    }
}

/// Drains the combined stdout/stderr stream into one buffer.
async fn capture(mut output: OutputStream) -> Result<Vec<u8>, ExecError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = output.next().await {
        let chunk = chunk.map_err(|source| ExecError::Stream { source })?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

/// Removes the terminal's echo of `input` from the front of `output`.
///
/// The TTY echoes what was written to stdin, newlines translated to CRLF.
fn strip_echo(output: &str, input: &str) -> String {
    let written = format!("{input}\n");
    let echoed = written.replace('\n', "\r\n");

    output
        .strip_prefix(echoed.as_str())
        .or_else(|| output.strip_prefix(written.as_str()))
        .unwrap_or_else(|| {
            debug!("Output does not start with the echoed input, returning it unchanged");
            output
        })
        .to_string()
}
