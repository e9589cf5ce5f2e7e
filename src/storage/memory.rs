//! In-memory storage backend.
//!
//! Objects are held in a `RwLock<HashMap>`.  A configurable limit
//! (`max_size_bytes`) caps total stored bytes.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

use bytes::Bytes;

use super::backend::StorageBackend;

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Bytes>,
    current_size: u64,
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
}

impl MemoryBackend {
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_size_bytes,
        }
    }

    /// Total bytes currently stored.
    pub fn current_size(&self) -> u64 {
        self.inner.read().expect("rwlock poisoned").current_size
    }
}

impl StorageBackend for MemoryBackend {
    fn create_bucket(&self, _bucket: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn write(&self, storage_key: &str, source: &mut dyn Read) -> anyhow::Result<u64> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let size = data.len() as u64;

        let mut inner = self.inner.write().expect("rwlock poisoned");
        let replaced = inner
            .objects
            .get(storage_key)
            .map_or(0, |old| old.len() as u64);
        let projected = inner.current_size - replaced + size;
        if self.max_size_bytes > 0 && projected > self.max_size_bytes {
            anyhow::bail!(
                "memory storage limit exceeded: {} bytes needed, limit is {}",
                projected,
                self.max_size_bytes
            );
        }
        inner.objects.insert(storage_key.to_string(), Bytes::from(data));
        inner.current_size = projected;
        Ok(size)
    }

    fn open(&self, storage_key: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let inner = self.inner.read().expect("rwlock poisoned");
        match inner.objects.get(storage_key) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => anyhow::bail!("Object not found at storage key: {}", storage_key),
        }
    }

    fn exists(&self, storage_key: &str) -> anyhow::Result<bool> {
        let inner = self.inner.read().expect("rwlock poisoned");
        Ok(inner.objects.contains_key(storage_key))
    }

    fn delete(&self, storage_key: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        if let Some(old) = inner.objects.remove(storage_key) {
            inner.current_size -= old.len() as u64;
        }
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        let prefix = format!("{bucket}/");
        let mut inner = self.inner.write().expect("rwlock poisoned");
        let mut freed = 0u64;
        inner.objects.retain(|key, data| {
            let keep = !key.starts_with(&prefix);
            if !keep {
                freed += data.len() as u64;
            }
            keep
        });
        inner.current_size -= freed;
        Ok(())
    }
}
