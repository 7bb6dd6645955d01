//! File-backed catalog of images, languages and usage statistics.
//!
//! The whole catalog is one TOML document, replaced atomically on every
//! mutation.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::sandbox::{ImageCatalog, Language, StatsRecorder};

/// One built image version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub version: u32,
    pub instructions: String,
    #[serde(default)]
    pub in_use: bool,
    pub created_at: DateTime<Utc>,
    /// Languages registered against this image
    #[serde(default)]
    pub languages: BTreeSet<String>,
}

/// Accumulated resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub executions: u64,
    pub time_ms: u64,
    pub peak_memory_bytes: u64,
}

impl UsageTotals {
    fn add(&mut self, elapsed_ms: u64, peak_memory_bytes: u64) {
        self.executions += 1;
        self.time_ms = self.time_ms.saturating_add(elapsed_ms);
        self.peak_memory_bytes = self.peak_memory_bytes.saturating_add(peak_memory_bytes);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Usage {
    #[serde(default)]
    global: UsageTotals,
    #[serde(default)]
    identities: BTreeMap<String, UsageTotals>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    images: Vec<ImageRecord>,
    #[serde(default)]
    languages: BTreeMap<String, Language>,
    #[serde(default)]
    usage: Usage,
}

impl CatalogData {
    fn image_mut(&mut self, version: u32) -> Result<&mut ImageRecord> {
        self.images
            .iter_mut()
            .find(|image| image.version == version)
            .ok_or_else(|| anyhow!("Image version {version} does not exist"))
    }
}

/// Persistent catalog shared by the CLI and the runner.
///
/// Several `codebox` processes may use the same catalog file at once, so no
/// state is cached: reads load the file and writes re-read it while holding
/// an exclusive lock on a sibling `.lock` file.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    superuser: Option<String>,
    writer: Mutex<()>,
}

impl CatalogStore {
    /// Opens the catalog at `path`, starting empty if the file does not exist.
    ///
    /// Executions by `superuser` only count toward the global totals.
    pub fn open(path: &Path, superuser: Option<String>) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            superuser,
            writer: Mutex::new(()),
        };
        // Fail early on a corrupt file
        store.snapshot()?;
        Ok(store)
    }

    /// Current catalog content on disk.
    fn snapshot(&self) -> Result<CatalogData> {
        if !self.path.exists() {
            return Ok(CatalogData::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read catalog: {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse catalog: {}", self.path.display()))
    }

    /// Takes the cross-process write lock; released when the file is dropped.
    fn lock_file(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open catalog lock: {}", lock_path.display()))?;
        file.lock()
            .with_context(|| format!("Failed to lock catalog: {}", lock_path.display()))?;
        Ok(file)
    }

    /// Writes `data` to a temporary file and renames it over the catalog.
    fn save(&self, data: &CatalogData) -> Result<()> {
        let content = toml::to_string_pretty(data).context("Failed to serialize catalog")?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write catalog: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace catalog: {}", self.path.display()))?;
        Ok(())
    }

    /// Applies `change` to the latest catalog on disk and persists it.
    ///
    /// A failing `change` or write leaves the file untouched.
    fn update<T>(&self, change: impl FnOnce(&mut CatalogData) -> Result<T>) -> Result<T> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Catalog lock poisoned"))?;
        let _file_lock = self.lock_file()?;

        let mut data = self.snapshot()?;
        let value = change(&mut data)?;
        self.save(&data)?;
        Ok(value)
    }

    // Images

    /// Records a newly built image. It does not become active.
    pub fn register_image(&self, version: u32, instructions: &str) -> Result<()> {
        self.update(|data| {
            if data.images.iter().any(|image| image.version == version) {
                bail!("Image version {version} already exists");
            }
            data.images.push(ImageRecord {
                version,
                instructions: instructions.to_string(),
                in_use: false,
                created_at: Utc::now(),
                languages: BTreeSet::new(),
            });
            Ok(())
        })?;
        debug!(version, "Image registered");
        Ok(())
    }

    /// Marks `version` as the only image in use.
    pub fn set_active(&self, version: u32) -> Result<()> {
        self.update(|data| {
            data.image_mut(version)?;
            for image in &mut data.images {
                image.in_use = image.version == version;
            }
            Ok(())
        })
    }

    /// Deletes the record of `version`. The active image cannot be removed.
    pub fn remove_image(&self, version: u32) -> Result<()> {
        self.update(|data| {
            if data.image_mut(version)?.in_use {
                bail!("Image version {version} is active and cannot be removed");
            }
            data.images.retain(|image| image.version != version);
            Ok(())
        })
    }

    pub fn image(&self, version: u32) -> Result<Option<ImageRecord>> {
        Ok(self
            .snapshot()?
            .images
            .iter()
            .find(|image| image.version == version)
            .cloned())
    }

    /// All images, oldest version first.
    pub fn images(&self) -> Result<Vec<ImageRecord>> {
        let mut images = self.snapshot()?.images;
        images.sort_by_key(|image| image.version);
        Ok(images)
    }

    /// The image with the highest version.
    pub fn latest(&self) -> Result<Option<ImageRecord>> {
        Ok(self
            .snapshot()?
            .images
            .iter()
            .max_by_key(|image| image.version)
            .cloned())
    }

    pub fn active(&self) -> Result<Option<ImageRecord>> {
        Ok(self.snapshot()?.images.iter().find(|image| image.in_use).cloned())
    }

    // Languages

    /// Adds `language` or replaces the language of the same name.
    pub fn upsert_language(&self, language: Language) -> Result<()> {
        self.update(|data| {
            data.languages.insert(language.name.clone(), language);
            Ok(())
        })
    }

    pub fn language(&self, name: &str) -> Result<Option<Language>> {
        Ok(self.snapshot()?.languages.get(name).cloned())
    }

    pub fn languages(&self) -> Result<Vec<Language>> {
        Ok(self.snapshot()?.languages.values().cloned().collect())
    }

    /// Replaces the set of languages registered against `version`.
    pub fn link_languages(&self, version: u32, names: &[String]) -> Result<()> {
        self.update(|data| {
            if let Some(unknown) = names.iter().find(|name| !data.languages.contains_key(*name)) {
                bail!("Language {unknown} does not exist");
            }
            data.image_mut(version)?.languages = names.iter().cloned().collect();
            Ok(())
        })
    }

    /// Removes `names` from the languages registered against `version`.
    pub fn unlink_languages(&self, version: u32, names: &[String]) -> Result<()> {
        self.update(|data| {
            let image = data.image_mut(version)?;
            for name in names {
                image.languages.remove(name);
            }
            Ok(())
        })
    }

    // Statistics

    /// Totals across every execution.
    pub fn global_usage(&self) -> Result<UsageTotals> {
        Ok(self.snapshot()?.usage.global)
    }

    /// Totals of one identity, if it ever ran anything.
    pub fn usage(&self, identity: &str) -> Result<Option<UsageTotals>> {
        Ok(self.snapshot()?.usage.identities.get(identity).copied())
    }

    /// Adds one execution to the global and per-identity totals.
    pub fn record_execution(&self, identity: &str, elapsed_ms: u64, peak_memory_bytes: u64) -> Result<()> {
        let is_superuser = self.superuser.as_deref() == Some(identity);
        self.update(|data| {
            data.usage.global.add(elapsed_ms, peak_memory_bytes);
            if !is_superuser {
                data.usage
                    .identities
                    .entry(identity.to_string())
                    .or_default()
                    .add(elapsed_ms, peak_memory_bytes);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ImageCatalog for CatalogStore {
    async fn active_image_version(&self) -> Result<Option<u32>> {
        Ok(self.active()?.map(|image| image.version))
    }

    async fn language_is_registered(&self, version: u32, language: &str) -> Result<bool> {
        Ok(self
            .image(version)?
            .is_some_and(|image| image.languages.contains(language)))
    }
}

#[async_trait]
impl StatsRecorder for CatalogStore {
    async fn log_execution_stats(
        &self,
        identity: &str,
        elapsed_ms: u64,
        peak_memory_bytes: u64,
    ) -> Result<()> {
        self.record_execution(identity, elapsed_ms, peak_memory_bytes)
    }
}
