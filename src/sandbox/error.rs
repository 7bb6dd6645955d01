//! Domain-specific error types for sandbox operations.
//!
//! Every stage of a session fails with exactly one `ExecError` variant, which
//! carries the stage's `ErrorKind` and the underlying engine error as its
//! source. Callers match on `kind()` instead of parsing message strings.

use std::fmt;
use std::time::Duration;

/// Errors reported by the container engine transport.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The Docker API returned an error.
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// The referenced container, exec or image does not exist (anymore).
    #[error("No such object: {id}")]
    NotFound { id: String },

    /// A stream or response did not have the expected shape.
    #[error("Unexpected engine response: {message}")]
    Protocol { message: String },

    /// Local IO while talking to the engine (stdin writes, build contexts).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Creates a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns true if the engine reports the object as already gone.
    ///
    /// Removal of a container that is already removed (404) or being removed
    /// (409) counts as gone.
    pub fn is_gone(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code, ..
            }) => *status_code == 404 || *status_code == 409,
            _ => false,
        }
    }
}

/// The closed set of failure kinds surfaced to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ContainerCreateFailed,
    ContainerStartFailed,
    ContainerExecFailed,
    ExecStartFailed,
    StreamFailed,
    TelemetryFailed,
    LanguageNotFound,
    Timeout,
    NoActiveImage,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ContainerCreateFailed => "container-create-failed",
            Self::ContainerStartFailed => "container-start-failed",
            Self::ContainerExecFailed => "container-exec-failed",
            Self::ExecStartFailed => "exec-start-failed",
            Self::StreamFailed => "stream-failed",
            Self::TelemetryFailed => "telemetry-failed",
            Self::LanguageNotFound => "language-not-found",
            Self::Timeout => "timeout",
            Self::NoActiveImage => "no-active-image",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Failure of a single execution session.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The container could not be created.
    #[error("Failed to create container: {source}")]
    ContainerCreate {
        #[source]
        source: EngineError,
    },

    /// The container was created but could not be started.
    #[error("Failed to start container: {source}")]
    ContainerStart {
        #[source]
        source: EngineError,
    },

    /// An exec handle could not be created inside the container.
    #[error("Failed to create exec in container: {source}")]
    ContainerExec {
        #[source]
        source: EngineError,
    },

    /// An exec handle was created but could not be started.
    #[error("Failed to start exec: {source}")]
    ExecStart {
        #[source]
        source: EngineError,
    },

    /// The attached stdio stream broke mid-session.
    #[error("Exec stream failed: {source}")]
    Stream {
        #[source]
        source: EngineError,
    },

    /// Resource statistics could not be collected or recorded.
    #[error("Failed to record execution statistics: {source}")]
    Telemetry {
        #[source]
        source: anyhow::Error,
    },

    /// The language is not registered against the resolved image version.
    #[error("No such programming language: {language} (image version {version})")]
    LanguageNotFound { language: String, version: u32 },

    /// The sandboxed program exceeded its time limit.
    #[error("Program exceeded its time limit of {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    /// No version was pinned and no image is marked active.
    #[error("No active image")]
    NoActiveImage,

    /// Anything else, including collaborator failures.
    #[error("Internal error: {source}")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl ExecError {
    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            source: source.into(),
        }
    }

    /// Creates a `Telemetry` error.
    pub fn telemetry(source: impl Into<anyhow::Error>) -> Self {
        Self::Telemetry {
            source: source.into(),
        }
    }

    /// Returns the discriminant reported to the boundary layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContainerCreate { .. } => ErrorKind::ContainerCreateFailed,
            Self::ContainerStart { .. } => ErrorKind::ContainerStartFailed,
            Self::ContainerExec { .. } => ErrorKind::ContainerExecFailed,
            Self::ExecStart { .. } => ErrorKind::ExecStartFailed,
            Self::Stream { .. } => ErrorKind::StreamFailed,
            Self::Telemetry { .. } => ErrorKind::TelemetryFailed,
            Self::LanguageNotFound { .. } => ErrorKind::LanguageNotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoActiveImage => ErrorKind::NoActiveImage,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the failure is attributable to the caller's input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LanguageNotFound | ErrorKind::NoActiveImage
        )
    }

    /// Returns true if the boundary layer may retry the whole session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ContainerCreateFailed | ErrorKind::ContainerStartFailed
        )
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from the image builder.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build context could not be written.
    #[error("Failed to write build context {path}: {source}")]
    Context {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine reported an error while building.
    #[error("Image build failed: {source}")]
    Build {
        #[source]
        source: EngineError,
    },

    /// Pruning dangling containers or images failed.
    #[error("Failed to prune dangling artifacts: {source}")]
    Prune {
        #[source]
        source: EngineError,
    },

    /// Pruning deleted leftovers of an earlier build while strict pruning is on.
    #[error("Build left the host inconsistent: pruned {containers} containers and {images} images")]
    InvalidInput { containers: usize, images: usize },

    /// Removing an image failed.
    #[error("Failed to remove image {image}: {source}")]
    Remove {
        image: String,
        #[source]
        source: EngineError,
    },
}
