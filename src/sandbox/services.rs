//! Collaborators the runner consumes but does not own.
//!
//! Persistence of images, language registrations and usage statistics lives
//! outside the sandbox core; the runner only sees these traits.

use anyhow::Result;
use async_trait::async_trait;

/// Read access to image versions and their registered languages.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// The version currently marked in use, if any.
    async fn active_image_version(&self) -> Result<Option<u32>>;

    /// Whether `language` is registered against image `version`.
    async fn language_is_registered(&self, version: u32, language: &str) -> Result<bool>;
}

/// Sink for per-execution resource usage.
#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn log_execution_stats(
        &self,
        identity: &str,
        elapsed_ms: u64,
        peak_memory_bytes: u64,
    ) -> Result<()>;
}
