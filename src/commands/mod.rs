//! CLI command implementations.
//!
//! Each submodule implements a codebox CLI command with pure formatting
//! separated from IO for testability.

pub mod image;
pub mod lang;
pub mod run;
pub mod stats;

use anyhow::Result;
use std::sync::Arc;

use crate::catalog::CatalogStore;
use crate::config::Config;

/// Opens the catalog named by `config`.
pub(crate) fn open_catalog(config: &Config) -> Result<Arc<CatalogStore>> {
    let store = CatalogStore::open(&config.catalog.path, config.runner.superuser.clone())?;
    Ok(Arc::new(store))
}
