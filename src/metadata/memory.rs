//! In-memory object catalog.
//!
//! No persistence.  Useful for tests and ephemeral deployments.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::store::{BucketRecord, ObjectCatalog, ObjectFilter, ObjectRecord, ObjectStatus};

type ObjectKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<String, BucketRecord>,
    /// Ordered so listings come out sorted by bucket then name.
    objects: BTreeMap<ObjectKey, ObjectRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: RwLock<Inner>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectCatalog for MemoryCatalog {
    fn create_bucket(&self, record: &BucketRecord) -> anyhow::Result<Option<ObjectStatus>> {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        if let Some(existing) = inner.buckets.get(&record.name) {
            if !existing.status.is_replaceable() {
                return Ok(Some(existing.status));
            }
        }
        inner.buckets.insert(record.name.clone(), record.clone());
        Ok(None)
    }

    fn get_bucket(&self, bucket: &str) -> anyhow::Result<Option<BucketRecord>> {
        let inner = self.inner.read().expect("rwlock poisoned");
        Ok(inner.buckets.get(bucket).cloned())
    }

    fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>> {
        let inner = self.inner.read().expect("rwlock poisoned");
        Ok(inner.buckets.values().cloned().collect())
    }

    fn update_bucket_status(&self, bucket: &str, status: ObjectStatus) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        match inner.buckets.get_mut(bucket) {
            Some(record) => {
                record.status = status;
                Ok(())
            }
            None => Err(anyhow::anyhow!("bucket does not exist: {bucket}")),
        }
    }

    fn get_object(&self, bucket: &str, name: &str) -> anyhow::Result<Option<ObjectRecord>> {
        let inner = self.inner.read().expect("rwlock poisoned");
        Ok(inner
            .objects
            .get(&(bucket.to_string(), name.to_string()))
            .cloned())
    }

    fn insert_object(&self, record: &ObjectRecord) -> anyhow::Result<Option<ObjectStatus>> {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        let bucket_ready = inner
            .buckets
            .get(&record.bucket)
            .is_some_and(|bucket| bucket.status == ObjectStatus::Ready);
        if !bucket_ready {
            return Err(anyhow::anyhow!("bucket does not exist: {}", record.bucket));
        }
        let key = (record.bucket.clone(), record.name.clone());
        if let Some(existing) = inner.objects.get(&key) {
            if !existing.status.is_replaceable() {
                return Ok(Some(existing.status));
            }
        }
        inner.objects.insert(key, record.clone());
        Ok(None)
    }

    fn update_object(&self, record: &ObjectRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("rwlock poisoned");
        let key = (record.bucket.clone(), record.name.clone());
        match inner.objects.get_mut(&key) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(anyhow::anyhow!(
                "object does not exist: {}/{}",
                record.bucket,
                record.name
            )),
        }
    }

    fn list_objects(
        &self,
        bucket: &str,
        filter: &ObjectFilter,
    ) -> anyhow::Result<Vec<ObjectRecord>> {
        let inner = self.inner.read().expect("rwlock poisoned");
        Ok(inner
            .objects
            .iter()
            .filter(|((b, _), record)| b == bucket && filter.matches(record))
            .map(|(_, record)| record.clone())
            .collect())
    }
}
