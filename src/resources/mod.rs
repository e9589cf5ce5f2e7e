//! Concrete resources plugged into the transfer engine.

use std::fmt;

use crate::errors::TransferError;
use crate::transfer::headers::{HeaderFields, X_OBJECT_BUCKET, X_OBJECT_NAME};

pub mod bucket;
pub mod listing;
pub mod object;
pub mod replicator;

pub use listing::{ListingQuery, ListingResource};
pub use object::ObjectResource;
pub use replicator::RemoteReadResource;

/// What a path designates, as answered by existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    None,
    Bucket,
    Directory,
    Object,
}

impl StorageType {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageType::None => "NONE",
            StorageType::Bucket => "BUCKET",
            StorageType::Directory => "DIRECTORY",
            StorageType::Object => "OBJECT",
        }
    }
}

/// Business key of a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub bucket: String,
    pub name: String,
}

impl ObjectKey {
    /// Build a key from request path parameters, validating both parts.
    pub fn parse(bucket: &str, name: &str) -> Result<Self, TransferError> {
        validate_bucket_name(bucket)?;
        validate_object_name(name)?;
        Ok(Self::new(bucket, name))
    }

    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }

    /// Bucket and name, as reported on error responses.
    pub fn header_fields(&self) -> HeaderFields {
        HeaderFields::from([
            (X_OBJECT_BUCKET.to_string(), self.bucket.clone()),
            (X_OBJECT_NAME.to_string(), self.name.clone()),
        ])
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// Bucket names: 3 to 63 characters of lowercase letters, digits, `-` and
/// `.`, starting and ending with a letter or digit.
pub fn validate_bucket_name(bucket: &str) -> Result<(), TransferError> {
    let valid_chars = bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    let valid_ends = bucket
        .bytes()
        .next()
        .zip(bucket.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if !(3..=63).contains(&bucket.len()) || !valid_chars || !valid_ends {
        return Err(TransferError::invalid_argument(format!(
            "invalid bucket name: {bucket}"
        )));
    }
    Ok(())
}

/// Object names are `/`-separated paths without empty, `.` or `..`
/// segments, at most 1024 bytes long.
pub fn validate_object_name(name: &str) -> Result<(), TransferError> {
    let bad_segment = name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if name.len() > 1024 || bad_segment || name.contains('\0') {
        return Err(TransferError::invalid_argument(format!(
            "invalid object name: {name}"
        )));
    }
    Ok(())
}
