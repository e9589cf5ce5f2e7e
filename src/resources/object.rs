//! Accessor object resource: catalog plus storage backend.
//!
//! Uploads register an `UPLOAD` record, stream the body to the storage
//! backend on a dedicated writer thread and flip the record to `READY`
//! once the engine has the final size and hash.  Downloads serve
//! `READY` objects only.
//!
//! The non-streaming object operations (existence check, info, delete)
//! live here as plain blocking functions over the same catalog/storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::http::{header, HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn, Span};

use super::{ObjectKey, StorageType};
use crate::errors::TransferError;
use crate::metadata::{ObjectCatalog, ObjectFilter, ObjectRecord, ObjectStatus};
use crate::storage::StorageBackend;
use crate::transfer::headers::HeaderFields;
use crate::transfer::{PullSource, StreamHooks, TransformStream};

/// Object hooks for one request.
pub struct ObjectResource {
    catalog: Arc<dyn ObjectCatalog>,
    storage: Arc<dyn StorageBackend>,
    site: String,
    compute_sha256: bool,
    /// Caller-supplied attributes for a new object.
    metadata: HashMap<String, String>,
    expires: Option<DateTime<Utc>>,
    /// Record registered by the upload, or found by the download.
    record: Option<ObjectRecord>,
    writer: Option<JoinHandle<anyhow::Result<u64>>>,
    /// Set once the upload record reached its final state.
    settled: bool,
}

impl ObjectResource {
    pub fn new(
        catalog: Arc<dyn ObjectCatalog>,
        storage: Arc<dyn StorageBackend>,
        site: impl Into<String>,
        compute_sha256: bool,
    ) -> Self {
        Self {
            catalog,
            storage,
            site: site.into(),
            compute_sha256,
            metadata: HashMap::new(),
            expires: None,
            record: None,
            writer: None,
            settled: true,
        }
    }

    /// Take user metadata and expiry for a new object from the request's
    /// object header block.
    pub fn with_request_headers(mut self, headers: &HeaderMap) -> Self {
        let declared = ObjectRecord::from_headers(headers);
        self.metadata = declared.metadata;
        self.expires = declared.expires;
        self
    }

    fn mark_failed(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        if let Some(record) = self.record.as_mut() {
            record.status = ObjectStatus::ErrUpl;
            if let Err(e) = self.catalog.update_object(record) {
                error!(error = %e, bucket = %record.bucket, name = %record.name,
                    "could not mark failed upload");
            }
        }
    }
}

impl StreamHooks for ObjectResource {
    type Input = ObjectKey;
    type Output = ObjectRecord;

    fn check_digest_to_compute(&self, _input: &ObjectKey) -> bool {
        self.compute_sha256
    }

    fn check_push_able(
        &mut self,
        input: &ObjectKey,
        mut stream: TransformStream,
    ) -> Result<(), TransferError> {
        if !self.catalog.bucket_exists(&input.bucket)? {
            return Err(TransferError::not_found(format!(
                "bucket not found: {}",
                input.bucket
            )));
        }
        let record = ObjectRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            site: self.site.clone(),
            bucket: input.bucket.clone(),
            name: input.name.clone(),
            hash: None,
            status: ObjectStatus::Upload,
            creation: Some(Utc::now()),
            expires: self.expires,
            size: 0,
            metadata: std::mem::take(&mut self.metadata),
        };
        match self.catalog.insert_object(&record)? {
            None => {}
            Some(ObjectStatus::Upload) => {
                return Err(TransferError::not_acceptable(format!(
                    "object already in creation: {input}"
                )));
            }
            Some(status) => {
                return Err(TransferError::already_exists(format!(
                    "object already exists: {input}, status {}",
                    status.as_str()
                )));
            }
        }
        self.record = Some(record);
        self.settled = false;

        let storage = self.storage.clone();
        let key = input.storage_key();
        let span = Span::current();
        let spawned = thread::Builder::new()
            .name("storage-writer".into())
            .spawn(move || {
                let _entered = span.enter();
                let result = storage.write(&key, &mut stream);
                if let Err(e) = &result {
                    warn!(error = %e, key = %key, "storage write failed");
                }
                result
            });
        match spawned {
            Ok(handle) => {
                self.writer = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.mark_failed();
                Err(TransferError::Internal(e.into()))
            }
        }
    }

    fn get_answer_push_input_stream(
        &mut self,
        _input: &ObjectKey,
        final_hash: Option<&str>,
        final_size: u64,
    ) -> Result<ObjectRecord, TransferError> {
        let written = match self.writer.take().map(JoinHandle::join) {
            Some(Ok(Ok(written))) => written,
            Some(Ok(Err(e))) => {
                self.mark_failed();
                return Err(TransferError::Internal(e.context("storage write failed")));
            }
            Some(Err(_)) => {
                self.mark_failed();
                return Err(TransferError::Internal(anyhow::anyhow!(
                    "storage writer panicked"
                )));
            }
            None => return Err(TransferError::InvalidState("no upload in progress")),
        };
        if written != final_size {
            warn!(written, final_size, "storage size differs from bytes read");
        }

        let Some(record) = self.record.as_mut() else {
            return Err(TransferError::InvalidState("no upload in progress"));
        };
        record.hash = final_hash.map(str::to_string);
        record.size = final_size;
        record.status = ObjectStatus::Ready;
        self.catalog.update_object(record)?;
        self.settled = true;
        debug!(size = final_size, "object ready");
        Ok(record.clone())
    }

    fn get_header_push_input_stream(
        &mut self,
        _input: &ObjectKey,
        _final_hash: Option<&str>,
        _final_size: u64,
        output: &ObjectRecord,
    ) -> Result<HeaderFields, TransferError> {
        Ok(output.to_header_fields())
    }

    fn check_pull_able(
        &mut self,
        input: &ObjectKey,
        _request_headers: &HeaderMap,
    ) -> Result<bool, TransferError> {
        let Some(record) = self.catalog.get_object(&input.bucket, &input.name)? else {
            return Ok(false);
        };
        if record.status != ObjectStatus::Ready {
            debug!(status = record.status.as_str(), "object is not readable");
            return Ok(false);
        }
        if !self.storage.exists(&input.storage_key())? {
            warn!(key = %input.storage_key(), "catalog entry without stored bytes");
            return Ok(false);
        }
        self.record = Some(record);
        Ok(true)
    }

    fn get_pull_input_stream(&mut self, input: &ObjectKey) -> Result<PullSource, TransferError> {
        let reader = self.storage.open(&input.storage_key())?;
        Ok(PullSource::raw(reader))
    }

    fn get_header_pull_input_stream(
        &mut self,
        _input: &ObjectKey,
    ) -> Result<HeaderFields, TransferError> {
        let mut headers = self
            .record
            .as_ref()
            .map(ObjectRecord::to_header_fields)
            .unwrap_or_default();
        headers.insert(
            header::CONTENT_TYPE.as_str().to_string(),
            "application/octet-stream".to_string(),
        );
        Ok(headers)
    }

    fn get_header_error(&self, input: &ObjectKey, _status: StatusCode) -> HeaderFields {
        input.header_fields()
    }
}

impl Drop for ObjectResource {
    fn drop(&mut self) {
        self.mark_failed();
    }
}

// -- Non-streaming operations -------------------------------------------------

/// Whether `key` names a `READY` object, a directory of `READY` objects,
/// or nothing.
pub fn check_object_or_directory(
    catalog: &dyn ObjectCatalog,
    key: &ObjectKey,
) -> Result<StorageType, TransferError> {
    if !catalog.bucket_exists(&key.bucket)? {
        return Ok(StorageType::None);
    }
    if let Some(record) = catalog.get_object(&key.bucket, &key.name)? {
        if record.status == ObjectStatus::Ready {
            return Ok(StorageType::Object);
        }
    }
    let filter = ObjectFilter {
        name_prefix: Some(format!("{}/", key.name)),
        statuses: vec![ObjectStatus::Ready],
        ..ObjectFilter::default()
    };
    if catalog.list_objects(&key.bucket, &filter)?.is_empty() {
        Ok(StorageType::None)
    } else {
        Ok(StorageType::Directory)
    }
}

/// Catalog record of `key`, whatever its status.
pub fn object_info(
    catalog: &dyn ObjectCatalog,
    key: &ObjectKey,
) -> Result<ObjectRecord, TransferError> {
    catalog
        .get_object(&key.bucket, &key.name)?
        .ok_or_else(|| TransferError::not_found(format!("object not found: {key}")))
}

/// Delete an object: `DELETING`, storage removal, then `DELETED`, or
/// `ERR_DEL` when storage refuses.  Failed uploads and failed deletions
/// may be deleted too.
pub fn delete_object(
    catalog: &dyn ObjectCatalog,
    storage: &dyn StorageBackend,
    key: &ObjectKey,
) -> Result<ObjectRecord, TransferError> {
    let mut record = object_info(catalog, key)?;
    match record.status {
        ObjectStatus::Ready | ObjectStatus::ErrUpl | ObjectStatus::ErrDel => {}
        ObjectStatus::Deleted => {
            return Err(TransferError::deleted(format!("object already deleted: {key}")));
        }
        status => {
            return Err(TransferError::conflict(format!(
                "object cannot be deleted: {key}, status {}",
                status.as_str()
            )));
        }
    }

    record.status = ObjectStatus::Deleting;
    catalog.update_object(&record)?;
    if let Err(e) = storage.delete(&key.storage_key()) {
        record.status = ObjectStatus::ErrDel;
        catalog.update_object(&record)?;
        return Err(TransferError::Internal(e.context("storage delete failed")));
    }
    record.status = ObjectStatus::Deleted;
    catalog.update_object(&record)?;
    debug!(%key, "object deleted");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryCatalog;
    use crate::storage::memory::MemoryBackend;
    use crate::transfer::headers::{
        base32_lower, X_ERROR, X_OBJECT_HASH, X_OBJECT_NAME, X_OBJECT_STATUS,
    };
    use crate::transfer::{
        Direction, OutcomeBody, TransferHandler, TransferOutcome, TransferSession,
        TransferSettings,
    };
    use crate::metadata::BucketRecord;
    use sha2::{Digest, Sha256};
    use std::io::{self, Cursor, Read};
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fixture {
        catalog: Arc<MemoryCatalog>,
        storage: Arc<MemoryBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = Arc::new(MemoryCatalog::new());
            catalog
                .create_bucket(&BucketRecord::new("photos", "site-a"))
                .unwrap();
            Self {
                catalog,
                storage: Arc::new(MemoryBackend::new(0)),
            }
        }

        fn handler(&self, name: &str, direction: Direction) -> TransferHandler<ObjectResource> {
            let headers = HeaderMap::new();
            let session = TransferSession::setup(&headers, direction, 0, None, false);
            let resource =
                ObjectResource::new(self.catalog.clone(), self.storage.clone(), "site-a", true);
            let settings = TransferSettings {
                response_timeout: Duration::from_secs(5),
                ..TransferSettings::default()
            };
            TransferHandler::new(
                resource,
                ObjectKey::new("photos", name),
                session,
                settings,
                headers,
            )
        }

        fn key(&self, name: &str) -> ObjectKey {
            ObjectKey::new("photos", name)
        }

        fn status(&self, name: &str) -> Option<ObjectStatus> {
            self.catalog
                .get_object("photos", name)
                .unwrap()
                .map(|record| record.status)
        }
    }

    fn body_bytes(outcome: TransferOutcome) -> Vec<u8> {
        match outcome.body {
            OutcomeBody::Stream(mut reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).unwrap();
                out
            }
            other => panic!("expected a stream body, got {other:?}"),
        }
    }

    #[test]
    fn test_upload_then_download() {
        let fx = Fixture::new();
        let outcome = fx
            .handler("a/b.txt", Direction::Upload)
            .upload(Cursor::new(b"ABC".to_vec()))
            .unwrap();
        let expected = base32_lower(&Sha256::digest(b"ABC"));
        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(outcome.header(X_OBJECT_HASH), Some(expected.as_str()));
        assert_eq!(outcome.header(X_OBJECT_STATUS), Some("READY"));
        assert_eq!(fx.status("a/b.txt"), Some(ObjectStatus::Ready));

        let outcome = fx.handler("a/b.txt", Direction::Download).pull().unwrap();
        assert_eq!(outcome.header(X_OBJECT_HASH), Some(expected.as_str()));
        assert_eq!(body_bytes(outcome), b"ABC");
    }

    #[test]
    fn test_zero_length_upload() {
        let fx = Fixture::new();
        let outcome = fx
            .handler("empty", Direction::Upload)
            .upload(std::io::empty())
            .unwrap();
        assert_eq!(outcome.status, StatusCode::CREATED);
        let record = fx.catalog.get_object("photos", "empty").unwrap().unwrap();
        assert_eq!(record.size, 0);
        assert_eq!(record.status, ObjectStatus::Ready);
    }

    #[test]
    fn test_duplicate_upload_conflicts() {
        let fx = Fixture::new();
        fx.handler("dup", Direction::Upload)
            .upload(Cursor::new(b"one".to_vec()))
            .unwrap();
        let failure = fx
            .handler("dup", Direction::Upload)
            .upload(Cursor::new(b"two".to_vec()))
            .unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::CONFLICT);
        assert_eq!(failure.outcome.header(X_OBJECT_NAME), Some("dup"));
        assert_eq!(fx.status("dup"), Some(ObjectStatus::Ready));
    }

    #[test]
    fn test_upload_to_missing_bucket() {
        let fx = Fixture::new();
        let headers = HeaderMap::new();
        let session = TransferSession::setup(&headers, Direction::Upload, 0, None, false);
        let resource = ObjectResource::new(fx.catalog.clone(), fx.storage.clone(), "s", true);
        let failure = TransferHandler::new(
            resource,
            ObjectKey::new("nowhere", "x"),
            session,
            TransferSettings::default(),
            headers,
        )
        .upload(Cursor::new(b"x".to_vec()))
        .unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::NOT_FOUND);
        assert_eq!(failure.outcome.header(X_ERROR), Some("bucket not found: nowhere"));
    }

    #[test]
    fn test_failed_storage_marks_record() {
        let fx = Fixture::new();
        let storage = Arc::new(MemoryBackend::new(2));
        let headers = HeaderMap::new();
        let session = TransferSession::setup(&headers, Direction::Upload, 0, None, false);
        let resource = ObjectResource::new(fx.catalog.clone(), storage, "s", true);
        let failure = TransferHandler::new(
            resource,
            ObjectKey::new("photos", "big"),
            session,
            TransferSettings::default(),
            headers,
        )
        .upload(Cursor::new(b"too large".to_vec()))
        .unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fx.status("big"), Some(ObjectStatus::ErrUpl));

        // A failed upload keeps the name until it is deleted.
        let failure = fx
            .handler("big", Direction::Upload)
            .upload(Cursor::new(b"ok".to_vec()))
            .unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::CONFLICT);

        delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("big")).unwrap();
        fx.handler("big", Direction::Upload)
            .upload(Cursor::new(b"ok".to_vec()))
            .unwrap();
        assert_eq!(fx.status("big"), Some(ObjectStatus::Ready));
    }

    /// Yields its bytes only once the gate opens.
    struct GatedReader {
        gate: mpsc::Receiver<()>,
        data: Cursor<Vec<u8>>,
        opened: bool,
    }

    impl Read for GatedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.opened {
                self.gate
                    .recv()
                    .map_err(|_| io::Error::other("gate dropped"))?;
                self.opened = true;
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn test_upload_in_flight_refuses_second_upload() {
        let fx = Fixture::new();
        let (open_gate, gate) = mpsc::channel();
        let first = fx.handler("x", Direction::Upload);
        let running = std::thread::spawn(move || {
            first.upload(GatedReader {
                gate,
                data: Cursor::new(b"AAAA-first".to_vec()),
                opened: false,
            })
        });

        let mut waited = 0;
        while fx.status("x") != Some(ObjectStatus::Upload) {
            assert!(waited < 500, "first upload never registered");
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }

        let failure = fx
            .handler("x", Direction::Upload)
            .upload(Cursor::new(b"BB".to_vec()))
            .unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            failure.outcome.header(X_ERROR),
            Some("object already in creation: photos/x")
        );
        assert_eq!(fx.status("x"), Some(ObjectStatus::Upload));

        open_gate.send(()).unwrap();
        let outcome = running.join().unwrap().unwrap();
        assert_eq!(outcome.status, StatusCode::CREATED);

        let record = fx.catalog.get_object("photos", "x").unwrap().unwrap();
        let expected = base32_lower(&Sha256::digest(b"AAAA-first"));
        assert_eq!(record.size, 10);
        assert_eq!(record.hash.as_deref(), Some(expected.as_str()));
        let body = body_bytes(fx.handler("x", Direction::Download).pull().unwrap());
        assert_eq!(body, b"AAAA-first");
    }

    #[test]
    fn test_delete_lifecycle() {
        let fx = Fixture::new();
        fx.handler("gone", Direction::Upload)
            .upload(Cursor::new(b"data".to_vec()))
            .unwrap();

        let record =
            delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("gone")).unwrap();
        assert_eq!(record.status, ObjectStatus::Deleted);
        assert_eq!(fx.status("gone"), Some(ObjectStatus::Deleted));
        assert!(!fx.storage.exists("photos/gone").unwrap());

        let err = delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("gone"))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GONE);
        let err = delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("never"))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let failure = fx.handler("gone", Direction::Download).pull().unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::NOT_FOUND);

        // A deleted name can be uploaded again.
        fx.handler("gone", Direction::Upload)
            .upload(Cursor::new(b"back".to_vec()))
            .unwrap();
        assert_eq!(fx.status("gone"), Some(ObjectStatus::Ready));
    }

    #[test]
    fn test_delete_refused_while_uploading() {
        let fx = Fixture::new();
        fx.catalog
            .insert_object(&ObjectRecord {
                bucket: "photos".into(),
                name: "busy".into(),
                status: ObjectStatus::Upload,
                ..ObjectRecord::default()
            })
            .unwrap();
        let err = delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("busy"))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(fx.status("busy"), Some(ObjectStatus::Upload));
    }

    /// Storage whose deletions always fail.
    struct StuckStorage(MemoryBackend);

    impl StorageBackend for StuckStorage {
        fn create_bucket(&self, bucket: &str) -> anyhow::Result<()> {
            self.0.create_bucket(bucket)
        }
        fn write(&self, storage_key: &str, source: &mut dyn Read) -> anyhow::Result<u64> {
            self.0.write(storage_key, source)
        }
        fn open(&self, storage_key: &str) -> anyhow::Result<Box<dyn Read + Send>> {
            self.0.open(storage_key)
        }
        fn exists(&self, storage_key: &str) -> anyhow::Result<bool> {
            self.0.exists(storage_key)
        }
        fn delete(&self, _storage_key: &str) -> anyhow::Result<()> {
            anyhow::bail!("device busy")
        }
        fn delete_bucket(&self, _bucket: &str) -> anyhow::Result<()> {
            anyhow::bail!("device busy")
        }
    }

    #[test]
    fn test_failed_storage_delete_marks_record() {
        let fx = Fixture::new();
        let storage = StuckStorage(MemoryBackend::new(0));
        fx.catalog
            .insert_object(&ObjectRecord {
                bucket: "photos".into(),
                name: "stuck".into(),
                status: ObjectStatus::Ready,
                ..ObjectRecord::default()
            })
            .unwrap();
        let err = delete_object(fx.catalog.as_ref(), &storage, &fx.key("stuck")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fx.status("stuck"), Some(ObjectStatus::ErrDel));

        // A failed deletion can be retried.
        delete_object(fx.catalog.as_ref(), fx.storage.as_ref(), &fx.key("stuck")).unwrap();
        assert_eq!(fx.status("stuck"), Some(ObjectStatus::Deleted));
    }

    #[test]
    fn test_check_object_or_directory() {
        let fx = Fixture::new();
        fx.handler("2024/cat.png", Direction::Upload)
            .upload(Cursor::new(b"meow".to_vec()))
            .unwrap();
        fx.catalog
            .insert_object(&ObjectRecord {
                bucket: "photos".into(),
                name: "pending/a".into(),
                status: ObjectStatus::Upload,
                ..ObjectRecord::default()
            })
            .unwrap();

        let check = |bucket: &str, name: &str| {
            check_object_or_directory(fx.catalog.as_ref(), &ObjectKey::new(bucket, name)).unwrap()
        };
        assert_eq!(check("photos", "2024/cat.png"), StorageType::Object);
        assert_eq!(check("photos", "2024"), StorageType::Directory);
        assert_eq!(check("photos", "202"), StorageType::None);
        assert_eq!(check("photos", "pending"), StorageType::None);
        assert_eq!(check("photos", "pending/a"), StorageType::None);
        assert_eq!(check("videos", "2024"), StorageType::None);
    }

    #[test]
    fn test_object_info_reports_any_status() {
        let fx = Fixture::new();
        fx.catalog
            .insert_object(&ObjectRecord {
                bucket: "photos".into(),
                name: "half".into(),
                status: ObjectStatus::ErrUpl,
                ..ObjectRecord::default()
            })
            .unwrap();
        let record = object_info(fx.catalog.as_ref(), &fx.key("half")).unwrap();
        assert_eq!(record.status, ObjectStatus::ErrUpl);
        let err = object_info(fx.catalog.as_ref(), &fx.key("none")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_pending_object_is_not_readable() {
        let fx = Fixture::new();
        fx.catalog
            .insert_object(&ObjectRecord {
                bucket: "photos".into(),
                name: "pending".into(),
                status: ObjectStatus::Upload,
                ..ObjectRecord::default()
            })
            .unwrap();
        let failure = fx.handler("pending", Direction::Download).pull().unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::NOT_FOUND);

        let failure = fx.handler("missing", Direction::Download).pull().unwrap_err();
        assert_eq!(failure.outcome.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_request_metadata_is_recorded() {
        let fx = Fixture::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            crate::transfer::headers::X_OBJECT_METADATA,
            axum::http::HeaderValue::from_static(r#"{"owner":"ops"}"#),
        );
        let session = TransferSession::setup(&headers, Direction::Upload, 0, None, false);
        let resource = ObjectResource::new(fx.catalog.clone(), fx.storage.clone(), "s", true)
            .with_request_headers(&headers);
        TransferHandler::new(
            resource,
            ObjectKey::new("photos", "tagged"),
            session,
            TransferSettings::default(),
            headers,
        )
        .upload(Cursor::new(b"x".to_vec()))
        .unwrap();
        let record = fx.catalog.get_object("photos", "tagged").unwrap().unwrap();
        assert_eq!(record.metadata["owner"], "ops");
        assert_eq!(record.site, "s");
    }
}
