use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "codebox.toml";

/// Environment variable that overrides `[runner].superuser`.
pub const SUPERUSER_ENV: &str = "CODEBOX_SUPERUSER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Container settings applied to every sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base image name; versions are appended as tags
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Default memory limit (e.g., "100m", "1g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Docker network mode for sandboxes
    #[serde(default = "default_network_mode")]
    pub network_mode: String,

    /// Seconds a container gets to exit after a stop request
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            memory: default_memory(),
            network_mode: default_network_mode(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl EngineConfig {
    /// Memory limit in bytes.
    pub fn memory_limit(&self) -> Result<i64> {
        parse_memory_limit(&self.memory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Identity exempt from memory and time limits
    #[serde(default)]
    pub superuser: Option<String>,

    /// Time limit used for languages that do not set one
    #[serde(default = "default_time_limit")]
    pub default_time_limit_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            superuser: None,
            default_time_limit_ms: default_time_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Directory the Dockerfile is written to before each build
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,

    /// Report a build as invalid when pruning deleted anything
    #[serde(default)]
    pub prune_is_error: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            context_dir: default_context_dir(),
            prune_is_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

// Default value functions
fn default_base_image() -> String {
    "online_compiler".to_string()
}

fn default_memory() -> String {
    "100m".to_string()
}

fn default_network_mode() -> String {
    "none".to_string()
}

fn default_stop_grace() -> i64 {
    1
}

pub fn default_time_limit() -> u64 {
    20_000
}

fn default_context_dir() -> PathBuf {
    PathBuf::from(".codebox/build")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(".codebox/catalog.toml")
}

impl Config {
    /// Load configuration from `codebox.toml` in `dir`, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_from(&dir.join(CONFIG_FILE))
    }

    /// Load configuration from an explicit file, using defaults if not found
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str::<Self>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        if let Ok(superuser) = std::env::var(SUPERUSER_ENV) {
            if !superuser.is_empty() {
                config.runner.superuser = Some(superuser);
            }
        }

        // Fail early on a malformed limit rather than on the first run
        config.engine.memory_limit()?;

        Ok(config)
    }
}

/// Tag of image `version`: `{base_image}:{version}`.
pub fn image_name(base_image: &str, version: u32) -> String {
    format!("{base_image}:{version}")
}

/// Parse memory limit string (e.g., "1g", "100m", "512k") to bytes
pub fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();

    let (num, unit) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('k') {
        (num, 1024)
    } else {
        (limit.as_str(), 1)
    };

    let count: i64 = num.parse().context("Invalid memory limit")?;
    if count <= 0 {
        bail!("Invalid memory limit: {limit} (must be positive)");
    }
    count
        .checked_mul(unit)
        .with_context(|| format!("Invalid memory limit: {limit} (too large)"))
}
