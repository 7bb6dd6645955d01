//! Writes submitted source into a container with a one-shot heredoc exec.

use futures_util::StreamExt;
use tracing::debug;

use super::engine::ExecSpec;
use super::error::ExecError;
use super::lifecycle::Lifecycle;

/// Returns a heredoc delimiter that does not occur in `content`.
fn delimiter_for(content: &str) -> String {
    loop {
        let token = format!("EOF_{}", uuid::Uuid::new_v4().simple());
        if !content.contains(&token) {
            return token;
        }
    }
}

/// Shell script that writes `content` to `path`.
///
/// The delimiter is quoted so the shell performs no parameter, command or
/// arithmetic expansion inside the submitted source.
pub fn heredoc_script(path: &str, content: &str) -> String {
    let delimiter = delimiter_for(content);
    format!(
        "cat > {} << '{delimiter}'\n{content}\n{delimiter}",
        shell_words::quote(path)
    )
}

/// Writes `content` to `path` inside `container`.
///
/// Returns once the exec's output stream reaches end-of-stream, which is the
/// handoff point to the run phase.
pub async fn inject_file(
    lifecycle: &Lifecycle,
    container: &str,
    path: &str,
    content: &str,
) -> Result<(), ExecError> {
    let spec = ExecSpec::shell(heredoc_script(path, content));
    let exec_id = lifecycle.exec_container(container, &spec).await?;
    let mut io = lifecycle.start_exec(&exec_id, false).await?;

    while let Some(chunk) = io.output.next().await {
        let chunk = chunk.map_err(|source| ExecError::Stream { source })?;
        if !chunk.is_empty() {
            debug!(container, "inject: {}", String::from_utf8_lossy(&chunk).trim_end());
        }
    }

    debug!(container, path, bytes = content.len(), "Source injected");
    Ok(())
}
