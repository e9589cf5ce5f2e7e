//! Object catalog trait and record types.
//!
//! The catalog tracks buckets and the lifecycle state of every object.
//! Its methods are blocking: they are called from the transfer hooks,
//! which already run on a worker thread dedicated to the request.

use std::collections::HashMap;

use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::transfer::headers::{
    header_str, HeaderFields, X_FILTER_CREATION_AFTER, X_FILTER_CREATION_BEFORE,
    X_FILTER_NAME_PREFIX, X_FILTER_SIZE_GT, X_FILTER_SIZE_LT, X_FILTER_STATUSES, X_OBJECT_BUCKET,
    X_OBJECT_CREATION, X_OBJECT_EXPIRES, X_OBJECT_HASH, X_OBJECT_ID, X_OBJECT_METADATA,
    X_OBJECT_NAME, X_OBJECT_SITE, X_OBJECT_SIZE, X_OBJECT_STATUS,
};

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle state of an object or a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    #[default]
    Unknown,
    /// Bytes are being received.
    Upload,
    Ready,
    /// The upload failed.
    ErrUpl,
    Deleting,
    Deleted,
    /// The deletion failed.
    ErrDel,
}

impl ObjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectStatus::Unknown => "UNKNOWN",
            ObjectStatus::Upload => "UPLOAD",
            ObjectStatus::Ready => "READY",
            ObjectStatus::ErrUpl => "ERR_UPL",
            ObjectStatus::Deleting => "DELETING",
            ObjectStatus::Deleted => "DELETED",
            ObjectStatus::ErrDel => "ERR_DEL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let status = match value.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => ObjectStatus::Unknown,
            "UPLOAD" => ObjectStatus::Upload,
            "READY" => ObjectStatus::Ready,
            "ERR_UPL" => ObjectStatus::ErrUpl,
            "DELETING" => ObjectStatus::Deleting,
            "DELETED" => ObjectStatus::Deleted,
            "ERR_DEL" => ObjectStatus::ErrDel,
            _ => return None,
        };
        Some(status)
    }

    /// Whether a new upload or bucket creation may take over an entry in
    /// this state.  Only deleted entries are recycled.
    pub fn is_replaceable(self) -> bool {
        matches!(self, ObjectStatus::Unknown | ObjectStatus::Deleted)
    }
}

// ── Bucket record ──────────────────────────────────────────────────

/// Metadata for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BucketRecord {
    pub name: String,
    pub site: String,
    pub status: ObjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<DateTime<Utc>>,
}

impl BucketRecord {
    /// A `READY` bucket created now.
    pub fn new(name: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            site: site.into(),
            status: ObjectStatus::Ready,
            creation: Some(Utc::now()),
        }
    }
}

// ── Object record ──────────────────────────────────────────────────

/// Metadata for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObjectRecord {
    pub id: String,
    pub site: String,
    pub bucket: String,
    pub name: String,
    /// Base32 SHA-256 of the plaintext, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub status: ObjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

impl ObjectRecord {
    /// Render the record as the object header block.
    pub fn to_header_fields(&self) -> HeaderFields {
        let mut headers = HeaderFields::new();
        let mut put = |name: &str, value: String| {
            if !value.is_empty() {
                headers.insert(name.to_string(), value);
            }
        };
        put(X_OBJECT_ID, self.id.clone());
        put(X_OBJECT_SITE, self.site.clone());
        put(X_OBJECT_BUCKET, self.bucket.clone());
        put(X_OBJECT_NAME, self.name.clone());
        put(X_OBJECT_HASH, self.hash.clone().unwrap_or_default());
        put(X_OBJECT_STATUS, self.status.as_str().to_string());
        put(
            X_OBJECT_CREATION,
            self.creation.as_ref().map(format_time).unwrap_or_default(),
        );
        put(
            X_OBJECT_EXPIRES,
            self.expires.as_ref().map(format_time).unwrap_or_default(),
        );
        put(X_OBJECT_SIZE, self.size.to_string());
        if !self.metadata.is_empty() {
            put(
                X_OBJECT_METADATA,
                serde_json::to_string(&self.metadata).unwrap_or_default(),
            );
        }
        headers
    }

    /// Read the object header block.  Missing or unparsable fields keep
    /// their defaults.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| header_str(headers, name).map(str::to_string);
        Self {
            id: text(X_OBJECT_ID).unwrap_or_default(),
            site: text(X_OBJECT_SITE).unwrap_or_default(),
            bucket: text(X_OBJECT_BUCKET).unwrap_or_default(),
            name: text(X_OBJECT_NAME).unwrap_or_default(),
            hash: text(X_OBJECT_HASH),
            status: header_str(headers, X_OBJECT_STATUS)
                .and_then(ObjectStatus::parse)
                .unwrap_or_default(),
            creation: header_str(headers, X_OBJECT_CREATION).and_then(parse_time),
            expires: header_str(headers, X_OBJECT_EXPIRES).and_then(parse_time),
            size: header_str(headers, X_OBJECT_SIZE)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            metadata: header_str(headers, X_OBJECT_METADATA)
                .and_then(|value| serde_json::from_str(value).ok())
                .unwrap_or_default(),
        }
    }
}

// ── Listing filter ─────────────────────────────────────────────────

/// Criteria for listing objects of one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectFilter {
    pub name_prefix: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<ObjectStatus>,
    pub creation_before: Option<DateTime<Utc>>,
    pub creation_after: Option<DateTime<Utc>>,
    pub size_lt: Option<u64>,
    pub size_gt: Option<u64>,
}

impl ObjectFilter {
    /// Build a filter from the listing headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            name_prefix: header_str(headers, X_FILTER_NAME_PREFIX).map(str::to_string),
            statuses: header_str(headers, X_FILTER_STATUSES)
                .map(|value| value.split(',').filter_map(ObjectStatus::parse).collect())
                .unwrap_or_default(),
            creation_before: header_str(headers, X_FILTER_CREATION_BEFORE).and_then(parse_time),
            creation_after: header_str(headers, X_FILTER_CREATION_AFTER).and_then(parse_time),
            size_lt: header_str(headers, X_FILTER_SIZE_LT).and_then(|v| v.parse().ok()),
            size_gt: header_str(headers, X_FILTER_SIZE_GT).and_then(|v| v.parse().ok()),
        }
    }

    pub fn matches(&self, record: &ObjectRecord) -> bool {
        if let Some(prefix) = &self.name_prefix {
            if !record.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(before) = self.creation_before {
            if record.creation.map_or(true, |creation| creation >= before) {
                return false;
            }
        }
        if let Some(after) = self.creation_after {
            if record.creation.map_or(true, |creation| creation <= after) {
                return false;
            }
        }
        if let Some(lt) = self.size_lt {
            if record.size >= lt {
                return false;
            }
        }
        if let Some(gt) = self.size_gt {
            if record.size <= gt {
                return false;
            }
        }
        true
    }
}

// ── Catalog trait ──────────────────────────────────────────────────

/// Blocking object catalog.
pub trait ObjectCatalog: Send + Sync + 'static {
    /// Register a bucket.  Returns the status of the existing entry,
    /// leaving the catalog unchanged, when the name is taken by a bucket
    /// that is not deleted.
    fn create_bucket(&self, record: &BucketRecord) -> anyhow::Result<Option<ObjectStatus>>;

    fn get_bucket(&self, bucket: &str) -> anyhow::Result<Option<BucketRecord>>;

    /// Whether `bucket` exists and is `READY`.
    fn bucket_exists(&self, bucket: &str) -> anyhow::Result<bool> {
        Ok(self
            .get_bucket(bucket)?
            .is_some_and(|record| record.status == ObjectStatus::Ready))
    }

    /// Every bucket entry, deleted ones included, ordered by name.
    fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>>;

    fn update_bucket_status(&self, bucket: &str, status: ObjectStatus) -> anyhow::Result<()>;

    fn get_object(&self, bucket: &str, name: &str) -> anyhow::Result<Option<ObjectRecord>>;

    /// Insert a new record into a `READY` bucket.  Returns the status of
    /// the existing entry, leaving the catalog unchanged, when the name
    /// is taken by an object that may not be replaced.
    fn insert_object(&self, record: &ObjectRecord) -> anyhow::Result<Option<ObjectStatus>>;

    /// Overwrite an existing record.
    fn update_object(&self, record: &ObjectRecord) -> anyhow::Result<()>;

    /// Records of `bucket` matching `filter`, ordered by name.
    fn list_objects(&self, bucket: &str, filter: &ObjectFilter)
        -> anyhow::Result<Vec<ObjectRecord>>;
}
