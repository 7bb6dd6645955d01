//! Mock container engine for testing.
//!
//! Emulates just enough of Docker to drive whole sessions: containers get
//! sequential ids, the injected file is remembered per container and the run
//! exec prints the TTY echo of its stdin followed by that file's content.
//! Every call is recorded for assertions, and any stage can be scripted to
//! fail.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;

use super::engine::{
    ContainerEngine, ContainerSpec, ContainerUsage, ExecIo, ExecSpec, PruneReport,
};
use super::error::EngineError;
use super::services::{ImageCatalog, StatsRecorder};

/// Stages the mock can be told to fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FailPoint {
    Create,
    Start,
    InjectExec,
    InjectStart,
    InjectStream,
    RunExec,
    RunStart,
    RunStream,
    Usage,
    Stop,
    Remove,
    Build,
    Prune,
    RemoveImage,
}

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create(ContainerSpec),
    Start(String),
    CreateExec(String, ExecSpec),
    StartExec(String),
    Usage(String),
    Stop(String),
    Remove(String),
    Build(String),
    Prune,
    RemoveImage(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    next_id: usize,
    execs: HashMap<String, (String, ExecSpec)>,
    files: HashMap<String, String>,
    removed: HashSet<String>,
    build_contexts: Vec<Bytes>,
}

/// A scriptable in-memory `ContainerEngine`.
#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    state: Arc<Mutex<MockState>>,
    fail: Arc<HashSet<FailPoint>>,
    run_delay: Option<Duration>,
    hang: bool,
    stdin_blocked: bool,
    peak_memory: u64,
    prune: PruneReport,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            peak_memory: 42 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Fails every call at the given stage.
    pub fn failing_at(point: FailPoint) -> Self {
        Self {
            fail: Arc::new([point].into_iter().collect()),
            ..Self::new()
        }
    }

    /// The run exec never reaches end-of-stream.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    /// The run exec finishes after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            run_delay: Some(delay),
            ..Self::new()
        }
    }

    /// The run exec never reads stdin: writes stay pending and no output
    /// is produced.
    pub fn ignoring_stdin() -> Self {
        Self {
            stdin_blocked: true,
            ..Self::new()
        }
    }

    /// `prune` reports these deletions.
    pub fn with_prune_report(mut self, report: PruneReport) -> Self {
        self.prune = report;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn removals(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove(_)))
    }

    /// Content injected into a container, if any.
    pub fn injected_file(&self, container: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(container).cloned()
    }

    pub fn build_contexts(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().build_contexts.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check(&self, point: FailPoint) -> Result<(), EngineError> {
        if self.fail.contains(&point) {
            Err(EngineError::protocol(format!("scripted failure at {point:?}")))
        } else {
            Ok(())
        }
    }
}

/// Extracts the heredoc body from `cat > path << 'DELIM'\n<body>\nDELIM`.
fn heredoc_body(script: &str) -> Option<String> {
    let (_, rest) = script.split_once('\n')?;
    let end = rest.rfind('\n')?;
    Some(rest[..end].to_string())
}

/// Stdin sink that keeps everything written to it, or blocks forever.
struct CaptureSink {
    written: Arc<Mutex<Vec<u8>>>,
    blocked: bool,
}

impl AsyncWrite for CaptureSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.blocked {
            return Poll::Pending;
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(Call::Create(spec.clone()));
        self.check(FailPoint::Create)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        Ok(format!("c{}", state.next_id))
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Start(id.to_string()));
        self.check(FailPoint::Start)
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        self.record(Call::CreateExec(container.to_string(), spec.clone()));
        self.check(if spec.tty {
            FailPoint::RunExec
        } else {
            FailPoint::InjectExec
        })?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let exec_id = format!("e{}", state.next_id);
        state
            .execs
            .insert(exec_id.clone(), (container.to_string(), spec.clone()));
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str, _tty: bool) -> Result<ExecIo, EngineError> {
        self.record(Call::StartExec(exec_id.to_string()));
        let (container, spec) = self
            .state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                id: exec_id.to_string(),
            })?;

        let stdin = Arc::new(Mutex::new(Vec::new()));
        let input = Box::pin(CaptureSink {
            written: stdin.clone(),
            blocked: spec.tty && self.stdin_blocked,
        });

        if !spec.tty {
            self.check(FailPoint::InjectStart)?;
            let body = spec.cmd.last().and_then(|s| heredoc_body(s)).unwrap_or_default();
            self.state.lock().unwrap().files.insert(container, body);
            let output = if self.fail.contains(&FailPoint::InjectStream) {
                stream::once(async { Err(EngineError::protocol("connection reset")) }).boxed()
            } else {
                stream::empty().boxed()
            };
            return Ok(ExecIo { output, input });
        }

        self.check(FailPoint::RunStart)?;
        if self.stdin_blocked {
            return Ok(ExecIo {
                output: stream::pending().boxed(),
                input,
            });
        }
        let program = self.injected_file(&container).unwrap_or_default();
        let delay = self.run_delay;
        let head = stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let echoed = String::from_utf8_lossy(&stdin.lock().unwrap()).replace('\n', "\r\n");
            Ok(Bytes::from(format!("{echoed}{program}")))
        });

        let mut output = head.boxed();
        if self.fail.contains(&FailPoint::RunStream) {
            output = output
                .chain(stream::once(async { Err(EngineError::protocol("connection reset")) }))
                .boxed();
        }
        if self.hang {
            output = output.chain(stream::pending()).boxed();
        }
        Ok(ExecIo { output, input })
    }

    async fn usage(&self, id: &str) -> Result<ContainerUsage, EngineError> {
        self.record(Call::Usage(id.to_string()));
        self.check(FailPoint::Usage)?;
        Ok(ContainerUsage {
            peak_memory: self.peak_memory,
            started_at: Utc::now() - chrono::Duration::milliseconds(250),
        })
    }

    async fn stop_container(&self, id: &str, _grace_secs: i64) -> Result<(), EngineError> {
        self.record(Call::Stop(id.to_string()));
        self.check(FailPoint::Stop)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Remove(id.to_string()));
        self.check(FailPoint::Remove)?;
        if self.state.lock().unwrap().removed.insert(id.to_string()) {
            Ok(())
        } else {
            Err(EngineError::NotFound { id: id.to_string() })
        }
    }

    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, EngineError> {
        self.record(Call::Build(tag.to_string()));
        self.check(FailPoint::Build)?;
        self.state.lock().unwrap().build_contexts.push(context);
        Ok(format!("Successfully tagged {tag}"))
    }

    async fn prune(&self) -> Result<PruneReport, EngineError> {
        self.record(Call::Prune);
        self.check(FailPoint::Prune)?;
        Ok(self.prune.clone())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), EngineError> {
        self.record(Call::RemoveImage(tag.to_string()));
        self.check(FailPoint::RemoveImage)
    }
}

/// In-memory image catalog.
#[derive(Debug, Default)]
pub(crate) struct MockCatalog {
    active: Option<u32>,
    registered: HashSet<(u32, String)>,
    fail: bool,
}

impl MockCatalog {
    pub fn with_active(version: u32) -> Self {
        Self {
            active: Some(version),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn register(mut self, version: u32, language: &str) -> Self {
        self.registered.insert((version, language.to_string()));
        self
    }
}

#[async_trait]
impl ImageCatalog for MockCatalog {
    async fn active_image_version(&self) -> anyhow::Result<Option<u32>> {
        if self.fail {
            anyhow::bail!("catalog unavailable");
        }
        Ok(self.active)
    }

    async fn language_is_registered(&self, version: u32, language: &str) -> anyhow::Result<bool> {
        if self.fail {
            anyhow::bail!("catalog unavailable");
        }
        Ok(self.registered.contains(&(version, language.to_string())))
    }
}

/// Statistics recorder that keeps every entry.
#[derive(Debug, Default)]
pub(crate) struct RecordingStats {
    entries: Mutex<Vec<(String, u64, u64)>>,
    fail: bool,
}

impl RecordingStats {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<(String, u64, u64)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatsRecorder for RecordingStats {
    async fn log_execution_stats(
        &self,
        identity: &str,
        elapsed_ms: u64,
        peak_memory_bytes: u64,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("statistics store unavailable");
        }
        self.entries
            .lock()
            .unwrap()
            .push((identity.to_string(), elapsed_ms, peak_memory_bytes));
        Ok(())
    }
}

/// Polls `cond` until it holds, advancing (possibly paused) tokio time.
pub(crate) async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {what}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heredoc_body() {
        let script = "cat > 'main.py' << 'EOF_1'\nprint(1)\nprint(2)\nEOF_1";
        assert_eq!(heredoc_body(script).unwrap(), "print(1)\nprint(2)");
        assert!(heredoc_body("no newline").is_none());
    }

    #[tokio::test]
    async fn test_double_remove_reports_not_found() {
        let engine = MockEngine::new();
        engine.remove_container("c1").await.unwrap();
        let err = engine.remove_container("c1").await.unwrap_err();
        assert!(err.is_gone());
        assert_eq!(engine.removals(), 2);
    }

    #[test]
    fn test_mock_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockEngine>();
    }
}
