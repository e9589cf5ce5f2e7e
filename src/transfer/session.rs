//! Per-request negotiated transfer state.

use axum::http::{header, HeaderMap};
use tracing::Span;

use super::headers::{
    generate_op_id, header_has_token, header_str, COMPRESSION_ZSTD, CONNECTION_CLOSE, X_OP_ID,
};

/// Which way the payload flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// State derived once from the request headers and owned by one handler.
#[derive(Debug, Clone)]
pub struct TransferSession {
    direction: Direction,
    keep_alive: bool,
    declared_length: u64,
    compress_in: bool,
    compress_out: bool,
    must_decompress_in: bool,
    op_id: String,
    declared_hash: Option<String>,
    span: Span,
}

impl TransferSession {
    /// Build the session from request headers.
    ///
    /// `explicit_length` overrides `Content-Length` when non-zero.
    /// `declared_hash` is only kept for uploads.  `keep_input_compressed`
    /// asks to hand the wire bytes to the backend as-is.
    pub fn setup(
        headers: &HeaderMap,
        direction: Direction,
        explicit_length: u64,
        declared_hash: Option<String>,
        keep_input_compressed: bool,
    ) -> Self {
        let keep_alive = header_str(headers, header::CONNECTION.as_str())
            .map_or(true, |value| !value.eq_ignore_ascii_case(CONNECTION_CLOSE));
        let mut declared_length = header_str(headers, header::CONTENT_LENGTH.as_str())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        if explicit_length > 0 {
            declared_length = explicit_length;
        }
        let compress_out =
            header_has_token(headers, header::ACCEPT_ENCODING.as_str(), COMPRESSION_ZSTD);
        let compress_in =
            header_has_token(headers, header::CONTENT_ENCODING.as_str(), COMPRESSION_ZSTD);
        let op_id = header_str(headers, X_OP_ID)
            .map(str::to_string)
            .unwrap_or_else(generate_op_id);
        let (must_decompress_in, declared_hash) = match direction {
            Direction::Upload => (
                compress_in && !keep_input_compressed,
                declared_hash.filter(|hash| !hash.is_empty()),
            ),
            Direction::Download => (false, None),
        };
        let span = tracing::info_span!(
            "transfer",
            op_id = %op_id,
            direction = direction.as_str()
        );
        Self {
            direction,
            keep_alive,
            declared_length,
            compress_in,
            compress_out,
            must_decompress_in,
            op_id,
            declared_hash,
            span,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Declared payload length, 0 when unknown.
    pub fn declared_length(&self) -> u64 {
        self.declared_length
    }

    /// The request body arrives compressed.
    pub fn negotiated_compress_in(&self) -> bool {
        self.compress_in
    }

    /// The peer accepts a compressed response body.
    pub fn negotiated_compress_out(&self) -> bool {
        self.compress_out
    }

    pub fn must_decompress_in(&self) -> bool {
        self.must_decompress_in
    }

    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn declared_hash(&self) -> Option<&str> {
        self.declared_hash.as_deref()
    }

    /// Diagnostic context carrying the operation id.  Enter it on every
    /// thread working for this request.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
