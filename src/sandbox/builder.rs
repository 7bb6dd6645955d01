//! Image builder: turns build instructions into a tagged sandbox image.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Builder as TarBuilder;
use tracing::{debug, info};

use crate::config::{image_name, BuilderConfig};

use super::engine::ContainerEngine;
use super::error::BuildError;

const DOCKERFILE: &str = "Dockerfile";

/// Builds and destroys versioned images of the sandbox base image.
#[derive(Clone)]
pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
    base_image: String,
    context_dir: PathBuf,
    prune_is_error: bool,
}

impl ImageBuilder {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        base_image: impl Into<String>,
        config: &BuilderConfig,
    ) -> Self {
        Self {
            engine,
            base_image: base_image.into(),
            context_dir: config.context_dir.clone(),
            prune_is_error: config.prune_is_error,
        }
    }

    /// Builds `{base_image}:{version}` from `instructions` and prunes dangling
    /// containers and images afterwards. Returns the image tag.
    pub async fn build(&self, version: u32, instructions: &str) -> Result<String, BuildError> {
        let tag = image_name(&self.base_image, version);
        info!(tag = %tag, "Building image");

        let context = self.write_context(instructions).await?;
        let last_output = self
            .engine
            .build_image(&tag, context)
            .await
            .map_err(|source| BuildError::Build { source })?;
        debug!(tag = %tag, last_output = %last_output, "Build finished");

        let report = self
            .engine
            .prune()
            .await
            .map_err(|source| BuildError::Prune { source })?;

        if !report.is_empty() {
            info!(
                tag = %tag,
                containers = report.containers_deleted.len(),
                images = report.images_deleted.len(),
                "Pruned dangling artifacts"
            );
            if self.prune_is_error {
                return Err(BuildError::InvalidInput {
                    containers: report.containers_deleted.len(),
                    images: report.images_deleted.len(),
                });
            }
        }

        info!(tag = %tag, "Image built successfully");
        Ok(tag)
    }

    /// Removes the image tagged for `version`.
    pub async fn destroy(&self, version: u32) -> Result<(), BuildError> {
        let tag = image_name(&self.base_image, version);
        self.engine
            .remove_image(&tag)
            .await
            .map_err(|source| BuildError::Remove {
                image: tag.clone(),
                source,
            })?;
        info!(tag = %tag, "Image removed");
        Ok(())
    }

    /// Writes the Dockerfile into the context directory and packs the
    /// directory as a tarball.
    async fn write_context(&self, instructions: &str) -> Result<Bytes, BuildError> {
        let dir = self.context_dir.clone();
        let context_err = |source| BuildError::Context {
            path: dir.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&dir).await.map_err(context_err)?;
        tokio::fs::write(dir.join(DOCKERFILE), instructions)
            .await
            .map_err(context_err)?;

        let packed = tokio::task::spawn_blocking({
            let dir = dir.clone();
            move || pack_dir(&dir)
        })
        .await
        .map_err(|e| context_err(std::io::Error::other(e)))?
        .map_err(context_err)?;

        Ok(Bytes::from(packed))
    }
}

fn pack_dir(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut tar_buf = Vec::new();
    {
        let mut tar = TarBuilder::new(&mut tar_buf);
        tar.append_dir_all(".", dir)?;
        tar.finish()?;
    }
    Ok(tar_buf)
}
