//! Sandbox image management commands.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{CatalogStore, ImageRecord};
use crate::config::Config;
use crate::sandbox::{BuildError, DockerEngine, ImageBuilder};

use super::open_catalog;

/// Image management actions.
#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Build a new image version from a Dockerfile
    ///
    /// The image is registered even when strict pruning rejects the build,
    /// since it was built before the prune ran.
    Build {
        /// Version number of the new image
        #[arg(id = "image_version", value_name = "VERSION")]
        version: u32,

        /// Dockerfile with the build instructions
        dockerfile: PathBuf,
    },

    /// Remove an image version (must not be active)
    Destroy {
        #[arg(id = "image_version", value_name = "VERSION")]
        version: u32,
    },

    /// Make an image version the one new executions run on
    Activate {
        #[arg(id = "image_version", value_name = "VERSION")]
        version: u32,
    },

    /// List image versions
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the languages available on an image version
    Link {
        #[arg(id = "image_version", value_name = "VERSION")]
        version: u32,

        /// Language names
        #[arg(required = true)]
        languages: Vec<String>,
    },

    /// Remove languages from an image version
    Unlink {
        #[arg(id = "image_version", value_name = "VERSION")]
        version: u32,

        #[arg(required = true)]
        languages: Vec<String>,
    },
}

/// Format the image table
pub fn format_images(images: &[ImageRecord]) -> String {
    let mut out = String::new();
    if images.is_empty() {
        writeln!(&mut out, "{} No images built yet.", "ℹ".blue()).unwrap();
        writeln!(&mut out, "  Run {} to build one.", "codebox image build".green()).unwrap();
        return out;
    }

    for image in images {
        let marker = if image.in_use {
            "●".green().bold()
        } else {
            "○".dimmed()
        };
        let languages = if image.languages.is_empty() {
            "-".to_string()
        } else {
            image.languages.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        writeln!(
            &mut out,
            "  {marker} {:<6} {}  {}",
            format!("v{}", image.version).cyan().bold(),
            image
                .created_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .dimmed(),
            languages
        )
        .unwrap();
    }
    out
}

fn builder(config: &Config, engine: DockerEngine) -> ImageBuilder {
    ImageBuilder::new(Arc::new(engine), config.engine.base_image.clone(), &config.builder)
}

async fn connect() -> Result<DockerEngine> {
    DockerEngine::connect()
        .await
        .context("Failed to connect to Docker. Is Docker running?")
}

/// Registers the outcome of a build in the catalog.
///
/// A build rejected by strict pruning has produced its image already, so it
/// is registered before the error is reported.
fn record_build(
    catalog: &CatalogStore,
    version: u32,
    instructions: &str,
    result: Result<String, BuildError>,
) -> Result<String> {
    match result {
        Ok(tag) => {
            catalog.register_image(version, instructions)?;
            Ok(tag)
        }
        Err(e @ BuildError::InvalidInput { .. }) => {
            catalog.register_image(version, instructions)?;
            warn!(version, "Image registered despite pruning leftovers");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn build(config: &Config, catalog: &CatalogStore, version: u32, dockerfile: &Path) -> Result<()> {
    if catalog.image(version)?.is_some() {
        let latest = catalog.latest()?.map_or(version, |image| image.version);
        bail!("Image version {version} already exists (latest is v{latest})");
    }

    let instructions = fs::read_to_string(dockerfile)
        .with_context(|| format!("Failed to read Dockerfile: {}", dockerfile.display()))?;

    let result = builder(config, connect().await?)
        .build(version, &instructions)
        .await;
    let tag = record_build(catalog, version, &instructions, result)?;

    info!(tag = %tag, "Image registered");
    println!("{} Built {}", "✓".green(), tag.cyan());
    Ok(())
}

async fn destroy(config: &Config, catalog: &CatalogStore, version: u32) -> Result<()> {
    let Some(image) = catalog.image(version)? else {
        bail!("Image version {version} does not exist");
    };
    if image.in_use {
        bail!("Image version {version} is active, activate another version first");
    }

    builder(config, connect().await?).destroy(version).await?;
    catalog.remove_image(version)?;

    println!("{} Removed image version {}", "✓".green(), version.to_string().cyan());
    Ok(())
}

/// Run image management command.
pub async fn run(config: &Config, action: ImageAction) -> Result<()> {
    let catalog = open_catalog(config)?;

    match action {
        ImageAction::Build {
            version,
            dockerfile,
        } => build(config, &catalog, version, &dockerfile).await?,
        ImageAction::Destroy { version } => destroy(config, &catalog, version).await?,
        ImageAction::Activate { version } => {
            catalog.set_active(version)?;
            println!("{} Image version {} is now active", "✓".green(), version.to_string().cyan());
        }
        ImageAction::List { json } => {
            let images = catalog.images()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&images).context("Failed to serialize images")?
                );
            } else {
                print!("{}", format_images(&images));
            }
        }
        ImageAction::Link { version, languages } => {
            catalog.link_languages(version, &languages)?;
            println!(
                "{} Image version {} runs: {}",
                "✓".green(),
                version.to_string().cyan(),
                languages.join(", ")
            );
        }
        ImageAction::Unlink { version, languages } => {
            catalog.unlink_languages(version, &languages)?;
            println!(
                "{} Removed from image version {}: {}",
                "✓".green(),
                version.to_string().cyan(),
                languages.join(", ")
            );
        }
    }

    Ok(())
}
