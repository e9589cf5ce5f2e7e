//! Object catalog layer.
//!
//! The catalog keeps track of buckets and object records.  The
//! [`store::ObjectCatalog`] trait defines the interface;
//! [`sqlite::SqliteCatalog`] is the default implementation.

use std::sync::Arc;

use crate::config::MetadataConfig;

pub mod memory;
pub mod sqlite;
pub mod store;

pub use store::{BucketRecord, ObjectCatalog, ObjectFilter, ObjectRecord, ObjectStatus};

/// Build the catalog selected by `config.engine`.
pub fn open_catalog(config: &MetadataConfig) -> anyhow::Result<Arc<dyn ObjectCatalog>> {
    match config.engine.as_str() {
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Arc::new(sqlite::SqliteCatalog::new(&config.sqlite.path)?))
        }
        "memory" => Ok(Arc::new(memory::MemoryCatalog::new())),
        other => anyhow::bail!("unknown metadata engine: {other}"),
    }
}
