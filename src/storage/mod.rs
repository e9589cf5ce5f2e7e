//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where bytes
//! physically live: local disk or process memory.

use std::sync::Arc;

use crate::config::StorageConfig;

pub mod backend;
pub mod local;
pub mod memory;

pub use backend::StorageBackend;

/// Build the backend selected by `config.backend`.
pub fn open_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(local::LocalBackend::new(&config.local.root_dir)?)),
        "memory" => Ok(Arc::new(memory::MemoryBackend::new(
            config.memory.max_size_bytes,
        ))),
        other => anyhow::bail!("unknown storage backend: {other}"),
    }
}
