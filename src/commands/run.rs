//! Run a program file in the sandbox.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::sandbox::{Caller, DockerEngine, ExecError, RunRequest, Runner};

use super::open_catalog;

/// Arguments of `codebox run`.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Language the program is written in
    #[arg(short, long)]
    pub lang: String,

    /// Source file to run
    pub file: PathBuf,

    /// Text written to the program's stdin
    #[arg(short, long)]
    pub input: Option<String>,

    /// Image version to run on (default: the active image)
    #[arg(long)]
    pub image: Option<u32>,

    /// Identity the execution is accounted to (default: $USER)
    #[arg(short, long)]
    pub user: Option<String>,
}

/// Picks the identity an execution is accounted to.
pub fn identity(user: Option<String>, env_user: Option<String>) -> String {
    user.or(env_user)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Format a failed execution for the terminal.
pub fn format_failure(err: &ExecError) -> String {
    let hint = if err.is_user_error() {
        "check the language and image registrations"
    } else if err.is_retryable() {
        "the sandbox could not be set up, try again"
    } else if err.is_timeout() {
        "the program ran past its time limit"
    } else {
        "the execution failed"
    };

    format!(
        "{} {} {}\n  {}",
        "✗".red(),
        err.kind().to_string().red().bold(),
        err,
        hint.dimmed()
    )
}

/// Entry point: runs one program against the local Docker daemon.
pub async fn run(config: &Config, args: RunArgs) -> Result<()> {
    let catalog = open_catalog(config)?;

    let Some(language) = catalog.language(&args.lang)? else {
        bail!("Unknown language: {}", args.lang);
    };

    let program = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read program file: {}", args.file.display()))?;

    let identity = identity(args.user, std::env::var("USER").ok());
    let caller = Caller::resolve(identity, config.runner.superuser.as_deref());

    let engine = DockerEngine::connect()
        .await
        .context("Failed to connect to Docker. Is Docker running?")?;
    let runner = Runner::new(Arc::new(engine), catalog.clone(), catalog, &config.engine)?;

    let request = RunRequest {
        caller,
        program,
        language,
        version: args.image,
        input: args.input,
    };

    let outcome = runner.run(request).await;
    debug!(running = runner.running_containers(), "Session finished");

    match outcome {
        Ok(output) => {
            print!("{output}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format_failure(&e));
            bail!("Execution failed: {}", e.kind())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_identity_prefers_flag() {
        assert_eq!(identity(Some("alice".into()), Some("bob".into())), "alice");
        assert_eq!(identity(None, Some("bob".into())), "bob");
        assert_eq!(identity(None, None), "anonymous");
        assert_eq!(identity(Some(String::new()), None), "anonymous");
    }

    #[test]
    fn test_format_failure_names_kind() {
        let out = format_failure(&ExecError::timeout(Duration::from_secs(2)));
        assert!(out.contains("timeout"));
        assert!(out.contains("time limit"));

        let out = format_failure(&ExecError::NoActiveImage);
        assert!(out.contains("no-active-image"));
        assert!(out.contains("registrations"));
    }
}
