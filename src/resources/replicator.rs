//! Remote read through the peer site.
//!
//! The replicator serves objects that live on another site by pulling them
//! from that site's accessor.  A compressed peer answer is relayed as-is,
//! and peer failures come back with their original status.

use std::io;

use axum::http::{header, HeaderMap, StatusCode};
use futures_util::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::runtime::Handle;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

use super::ObjectKey;
use crate::errors::TransferError;
use crate::metadata::ObjectRecord;
use crate::transfer::headers::{
    header_has_token, header_str, HeaderFields, COMPRESSION_ZSTD, X_CLIENT_ID, X_ERROR, X_OP_ID,
};
use crate::transfer::{PullSource, StreamHooks, TransferSession};

/// Characters left alone in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Read-only hooks backed by the peer site.  Uploads are refused.
pub struct RemoteReadResource {
    client: reqwest::Client,
    peer_url: String,
    runtime: Handle,
    op_id: String,
    accept_zstd: bool,
    client_id: Option<String>,
    response: Option<reqwest::Response>,
    headers: HeaderFields,
}

impl RemoteReadResource {
    /// `runtime` drives the peer request from the blocking handler thread.
    pub fn new(
        client: reqwest::Client,
        peer_url: impl Into<String>,
        runtime: Handle,
        session: &TransferSession,
    ) -> Self {
        Self {
            client,
            peer_url: peer_url.into(),
            runtime,
            op_id: session.op_id().to_string(),
            accept_zstd: session.negotiated_compress_out(),
            client_id: None,
            response: None,
            headers: HeaderFields::new(),
        }
    }

    /// Forward the caller's client id to the peer.
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        let name = key
            .name
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/objects/{}/{}",
            self.peer_url.trim_end_matches('/'),
            utf8_percent_encode(&key.bucket, PATH_SEGMENT),
            name
        )
    }
}

impl StreamHooks for RemoteReadResource {
    type Input = ObjectKey;
    type Output = ();

    fn check_pull_able(
        &mut self,
        input: &ObjectKey,
        _request_headers: &HeaderMap,
    ) -> Result<bool, TransferError> {
        if self.peer_url.is_empty() {
            return Err(TransferError::Server {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "no peer site configured".to_string(),
            });
        }
        let url = self.object_url(input);
        let mut request = self.client.get(&url).header(X_OP_ID, &self.op_id);
        if self.accept_zstd {
            request = request.header(header::ACCEPT_ENCODING, COMPRESSION_ZSTD);
        }
        if let Some(client_id) = &self.client_id {
            request = request.header(X_CLIENT_ID, client_id);
        }

        debug!(url = %url, "reading from peer site");
        let response = self
            .runtime
            .block_on(request.send())
            .map_err(|e| TransferError::Server {
                status: StatusCode::BAD_GATEWAY,
                message: format!("peer site unreachable: {e}"),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let message = header_str(response.headers(), X_ERROR)
                .map(str::to_string)
                .unwrap_or_else(|| format!("peer site answered {status}"));
            return Err(TransferError::from_status(status, message));
        }
        self.headers = ObjectRecord::from_headers(response.headers()).to_header_fields();
        self.response = Some(response);
        Ok(true)
    }

    fn get_pull_input_stream(&mut self, _input: &ObjectKey) -> Result<PullSource, TransferError> {
        let response = self
            .response
            .take()
            .ok_or(TransferError::InvalidState("peer response already consumed"))?;
        let compressed = header_has_token(
            response.headers(),
            header::CONTENT_ENCODING.as_str(),
            COMPRESSION_ZSTD,
        );
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let reader =
            SyncIoBridge::new_with_handle(StreamReader::new(Box::pin(chunks)), self.runtime.clone());
        Ok(PullSource::raw(reader).already_compressed(compressed))
    }

    fn get_header_pull_input_stream(
        &mut self,
        _input: &ObjectKey,
    ) -> Result<HeaderFields, TransferError> {
        Ok(std::mem::take(&mut self.headers))
    }

    fn get_header_error(&self, input: &ObjectKey, _status: StatusCode) -> HeaderFields {
        input.header_fields()
    }
}
