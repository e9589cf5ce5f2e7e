//! Bucket listing as a download.
//!
//! Matching records are written as newline-delimited JSON.  Each record is
//! serialized only when the response pump asks for more bytes.

use std::io::{self, Read};
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};

use crate::errors::TransferError;
use crate::metadata::{ObjectCatalog, ObjectFilter, ObjectRecord};
use crate::transfer::headers::{HeaderFields, APPLICATION_NDJSON, X_OBJECT_BUCKET};
use crate::transfer::{PullSource, StreamHooks};

/// Business key of a listing.
#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub bucket: String,
    pub filter: ObjectFilter,
}

impl ListingQuery {
    pub fn from_headers(bucket: impl Into<String>, headers: &HeaderMap) -> Self {
        Self {
            bucket: bucket.into(),
            filter: ObjectFilter::from_headers(headers),
        }
    }
}

pub struct ListingResource {
    catalog: Arc<dyn ObjectCatalog>,
}

impl ListingResource {
    pub fn new(catalog: Arc<dyn ObjectCatalog>) -> Self {
        Self { catalog }
    }
}

impl StreamHooks for ListingResource {
    type Input = ListingQuery;
    type Output = ();

    // `pull_list` skips this check; the bucket is checked on open.
    fn check_pull_able(
        &mut self,
        _input: &ListingQuery,
        _request_headers: &HeaderMap,
    ) -> Result<bool, TransferError> {
        Ok(true)
    }

    fn get_pull_input_stream(&mut self, input: &ListingQuery) -> Result<PullSource, TransferError> {
        if !self.catalog.bucket_exists(&input.bucket)? {
            return Err(TransferError::not_found(format!(
                "bucket not found: {}",
                input.bucket
            )));
        }
        let records = self.catalog.list_objects(&input.bucket, &input.filter)?;
        Ok(PullSource::raw(NdjsonReader::new(records)))
    }

    fn get_header_pull_input_stream(
        &mut self,
        input: &ListingQuery,
    ) -> Result<HeaderFields, TransferError> {
        Ok(HeaderFields::from([
            (
                header::CONTENT_TYPE.as_str().to_string(),
                APPLICATION_NDJSON.to_string(),
            ),
            (X_OBJECT_BUCKET.to_string(), input.bucket.clone()),
        ]))
    }

    fn get_header_error(&self, input: &ListingQuery, _status: StatusCode) -> HeaderFields {
        HeaderFields::from([(X_OBJECT_BUCKET.to_string(), input.bucket.clone())])
    }
}

/// Serializes records one line at a time.
pub struct NdjsonReader {
    records: std::vec::IntoIter<ObjectRecord>,
    line: Vec<u8>,
    pos: usize,
}

impl NdjsonReader {
    pub fn new(records: Vec<ObjectRecord>) -> Self {
        Self {
            records: records.into_iter(),
            line: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for NdjsonReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.line.len() {
            let Some(record) = self.records.next() else {
                return Ok(0);
            };
            self.line.clear();
            self.pos = 0;
            serde_json::to_writer(&mut self.line, &record)?;
            self.line.push(b'\n');
        }
        let n = buf.len().min(self.line.len() - self.pos);
        buf[..n].copy_from_slice(&self.line[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
