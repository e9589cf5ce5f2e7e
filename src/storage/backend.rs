//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The trait
//! works in terms of blocking byte streams so an object never has to fit
//! in memory.

use std::io::Read;

/// Blocking object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Create the container for a bucket.  Idempotent.
    fn create_bucket(&self, bucket: &str) -> anyhow::Result<()>;

    /// Consume `source` to its end and store it at `storage_key`,
    /// replacing any previous content.  Returns the number of bytes
    /// stored.  Nothing becomes visible under the key if reading fails.
    fn write(&self, storage_key: &str, source: &mut dyn Read) -> anyhow::Result<u64>;

    /// Open the object at `storage_key` for reading.
    fn open(&self, storage_key: &str) -> anyhow::Result<Box<dyn Read + Send>>;

    fn exists(&self, storage_key: &str) -> anyhow::Result<bool>;

    /// Delete the object at `storage_key`.  Missing objects are not an error.
    fn delete(&self, storage_key: &str) -> anyhow::Result<()>;

    /// Remove the container of a bucket and anything left in it.
    /// Missing buckets are not an error.
    fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()>;
}
