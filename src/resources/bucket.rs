//! Bucket operations.
//!
//! Buckets follow the same lifecycle as objects: `READY` once created,
//! then `DELETING` and `DELETED` (or `ERR_DEL`).  A deleted name may be
//! created again.  These are plain blocking calls; the HTTP layer runs
//! them on the blocking pool.

use tracing::{debug, warn};

use super::validate_bucket_name;
use crate::errors::TransferError;
use crate::metadata::{BucketRecord, ObjectCatalog, ObjectFilter, ObjectStatus};
use crate::storage::StorageBackend;

/// Object states that keep a bucket from being deleted.
const LIVE_OBJECT_STATUSES: [ObjectStatus; 3] = [
    ObjectStatus::Ready,
    ObjectStatus::Upload,
    ObjectStatus::Deleting,
];

pub fn create_bucket(
    catalog: &dyn ObjectCatalog,
    storage: &dyn StorageBackend,
    bucket: &str,
    site: &str,
) -> Result<BucketRecord, TransferError> {
    validate_bucket_name(bucket)?;
    storage.create_bucket(bucket)?;
    let record = BucketRecord::new(bucket, site);
    if let Some(status) = catalog.create_bucket(&record)? {
        debug!(bucket, status = status.as_str(), "bucket name taken");
        return Err(TransferError::already_exists(format!(
            "bucket already exists: {bucket}"
        )));
    }
    Ok(record)
}

/// Catalog entry of a bucket.  Deleted buckets answer `410`.
pub fn get_bucket(catalog: &dyn ObjectCatalog, bucket: &str) -> Result<BucketRecord, TransferError> {
    match catalog.get_bucket(bucket)? {
        None => Err(TransferError::not_found(format!("bucket not found: {bucket}"))),
        Some(record) if record.status == ObjectStatus::Deleted => Err(TransferError::deleted(
            format!("bucket deleted: {bucket}"),
        )),
        Some(record) => Ok(record),
    }
}

/// `READY` buckets, ordered by name.
pub fn list_buckets(catalog: &dyn ObjectCatalog) -> Result<Vec<BucketRecord>, TransferError> {
    Ok(catalog
        .list_buckets()?
        .into_iter()
        .filter(|record| record.status == ObjectStatus::Ready)
        .collect())
}

/// Delete an empty bucket.  Leftover failed objects are marked `DELETED`
/// together with it.
pub fn delete_bucket(
    catalog: &dyn ObjectCatalog,
    storage: &dyn StorageBackend,
    bucket: &str,
) -> Result<BucketRecord, TransferError> {
    let mut record = get_bucket(catalog, bucket)?;
    if !matches!(record.status, ObjectStatus::Ready | ObjectStatus::ErrDel) {
        return Err(TransferError::conflict(format!(
            "bucket cannot be deleted: {bucket}, status {}",
            record.status.as_str()
        )));
    }
    let live = ObjectFilter {
        statuses: LIVE_OBJECT_STATUSES.to_vec(),
        ..ObjectFilter::default()
    };
    if !catalog.list_objects(bucket, &live)?.is_empty() {
        return Err(TransferError::not_acceptable(format!(
            "bucket is not empty: {bucket}"
        )));
    }

    catalog.update_bucket_status(bucket, ObjectStatus::Deleting)?;
    if let Err(e) = storage.delete_bucket(bucket) {
        warn!(bucket, error = %e, "storage refused bucket deletion");
        catalog.update_bucket_status(bucket, ObjectStatus::ErrDel)?;
        return Err(TransferError::Internal(e.context("storage delete failed")));
    }
    for mut leftover in catalog.list_objects(bucket, &ObjectFilter::default())? {
        if leftover.status != ObjectStatus::Deleted {
            leftover.status = ObjectStatus::Deleted;
            catalog.update_object(&leftover)?;
        }
    }
    catalog.update_bucket_status(bucket, ObjectStatus::Deleted)?;
    record.status = ObjectStatus::Deleted;
    debug!(bucket, "bucket deleted");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryCatalog;
    use crate::metadata::ObjectRecord;
    use crate::storage::memory::MemoryBackend;
    use axum::http::StatusCode;

    fn object(name: &str, status: ObjectStatus) -> ObjectRecord {
        ObjectRecord {
            bucket: "photos".into(),
            name: name.into(),
            status,
            ..ObjectRecord::default()
        }
    }

    #[test]
    fn test_create_get_list() {
        let catalog = MemoryCatalog::new();
        let storage = MemoryBackend::new(0);
        let created = create_bucket(&catalog, &storage, "photos", "site-a").unwrap();
        assert_eq!(created.status, ObjectStatus::Ready);
        assert_eq!(get_bucket(&catalog, "photos").unwrap(), created);

        let err = create_bucket(&catalog, &storage, "photos", "site-a").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let err = create_bucket(&catalog, &storage, "No", "site-a").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        create_bucket(&catalog, &storage, "archive", "site-a").unwrap();
        let names: Vec<_> = list_buckets(&catalog)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["archive", "photos"]);
        assert_eq!(
            get_bucket(&catalog, "videos").unwrap_err().status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_delete_requires_empty_bucket() {
        let catalog = MemoryCatalog::new();
        let storage = MemoryBackend::new(0);
        create_bucket(&catalog, &storage, "photos", "site-a").unwrap();
        catalog.insert_object(&object("kept", ObjectStatus::Ready)).unwrap();

        let err = delete_bucket(&catalog, &storage, "photos").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_ACCEPTABLE);
        assert!(catalog.bucket_exists("photos").unwrap());
    }

    #[test]
    fn test_delete_lifecycle() {
        let catalog = MemoryCatalog::new();
        let storage = MemoryBackend::new(0);
        create_bucket(&catalog, &storage, "photos", "site-a").unwrap();
        catalog.insert_object(&object("broken", ObjectStatus::ErrUpl)).unwrap();
        storage.write("photos/broken", &mut &b"part"[..]).unwrap();

        let deleted = delete_bucket(&catalog, &storage, "photos").unwrap();
        assert_eq!(deleted.status, ObjectStatus::Deleted);
        assert!(!catalog.bucket_exists("photos").unwrap());
        assert!(!storage.exists("photos/broken").unwrap());
        assert_eq!(
            catalog.get_object("photos", "broken").unwrap().unwrap().status,
            ObjectStatus::Deleted
        );
        assert!(list_buckets(&catalog).unwrap().is_empty());

        let err = delete_bucket(&catalog, &storage, "photos").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GONE);
        let err = get_bucket(&catalog, "photos").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GONE);
        let err = delete_bucket(&catalog, &storage, "videos").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        // The name is free again, and so are its object names.
        create_bucket(&catalog, &storage, "photos", "site-b").unwrap();
        assert_eq!(
            catalog.insert_object(&object("broken", ObjectStatus::Upload)).unwrap(),
            None
        );
    }

    #[test]
    fn test_bucket_being_deleted_conflicts() {
        let catalog = MemoryCatalog::new();
        let storage = MemoryBackend::new(0);
        create_bucket(&catalog, &storage, "photos", "site-a").unwrap();
        catalog
            .update_bucket_status("photos", ObjectStatus::Deleting)
            .unwrap();
        let err = delete_bucket(&catalog, &storage, "photos").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
