//! Local filesystem storage backend.
//!
//! Objects are stored as files under a configurable root directory.
//! The storage key is used directly as a relative path ("bucket/name").
//!
//! All writes follow crash-only design: stream to a temp file, fsync,
//! rename.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::backend::StorageBackend;

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory (and its
    /// `.tmp` staging area) if needed.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a storage key to a path under the root, rejecting anything
    /// that could escape it.
    fn resolve(&self, storage_key: &str) -> anyhow::Result<PathBuf> {
        for component in Path::new(storage_key).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => anyhow::bail!("Path traversal detected in storage key: {}", storage_key),
            }
        }
        let path = self.root.join(storage_key);
        if path.exists() {
            let canonical_root = self.root.canonicalize()?;
            if !path.canonicalize()?.starts_with(&canonical_root) {
                anyhow::bail!("Path traversal detected in storage key: {}", storage_key);
            }
        }
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }
}

impl StorageBackend for LocalBackend {
    fn create_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        let path = self.resolve(bucket)?;
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn write(&self, storage_key: &str, source: &mut dyn Read) -> anyhow::Result<u64> {
        let final_path = self.resolve(storage_key)?;
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.temp_path();
        let written = (|| -> io::Result<u64> {
            let mut file = BufWriter::new(File::create(&tmp_path)?);
            let written = io::copy(source, &mut file)?;
            file.flush()?;
            file.get_ref().sync_all()?;
            Ok(written)
        })();
        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e.into());
            }
        };

        std::fs::rename(&tmp_path, &final_path)?;
        debug!(storage_key, written, "object stored");
        Ok(written)
    }

    fn open(&self, storage_key: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let path = self.resolve(storage_key)?;
        if !path.is_file() {
            anyhow::bail!("Object not found at storage key: {}", storage_key);
        }
        Ok(Box::new(File::open(path)?))
    }

    fn exists(&self, storage_key: &str) -> anyhow::Result<bool> {
        let path = self.resolve(storage_key)?;
        Ok(path.is_file())
    }

    fn delete(&self, storage_key: &str) -> anyhow::Result<()> {
        let path = self.resolve(storage_key)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        let path = self.resolve(bucket)?;
        if path == self.root || bucket.starts_with(".tmp") {
            anyhow::bail!("not a bucket directory: {}", bucket);
        }
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
            debug!(bucket, "bucket directory removed");
        }
        Ok(())
    }
}
