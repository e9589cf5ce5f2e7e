//! RelayStore library: multi-site object storage gateway.
//!
//! This crate provides the streaming transfer engine and the components
//! around it: object catalog, pluggable storage backends, the concrete
//! resources that plug into the engine, and the HTTP surface.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod metadata;
pub mod metrics;
pub mod resources;
pub mod server;
pub mod storage;
pub mod transfer;

use crate::config::Config;
use crate::metadata::ObjectCatalog;
use crate::storage::StorageBackend;
use crate::transfer::TransferSettings;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    pub config: Config,
    /// Derived once from `config.transfer`.
    pub settings: TransferSettings,
    pub catalog: Arc<dyn ObjectCatalog>,
    pub storage: Arc<dyn StorageBackend>,
    /// HTTP client for the peer site.
    pub peer: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: Arc<dyn ObjectCatalog>,
        storage: Arc<dyn StorageBackend>,
        peer: reqwest::Client,
    ) -> Self {
        Self {
            settings: TransferSettings::from_config(&config),
            config,
            catalog,
            storage,
            peer,
        }
    }
}
