//! The transfer protocol engine.
//!
//! [`TransferHandler`] drives the upload and download state machines for
//! one request.  Everything specific to a resource (admission checks,
//! where bytes go, which headers describe them) is supplied through the
//! [`StreamHooks`] trait.  The handler is blocking: it is meant to run on
//! a worker thread dedicated to the request.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::codec::CompressingReader;
use super::headers::{
    HeaderFields, APPLICATION_JSON, CHUNKED, COMPRESSION_ZSTD, CONNECTION_CLOSE, X_ERROR,
    X_MODULE, X_OP_ID,
};
use super::session::{Direction, TransferSession};
use super::stream::{CompletionHandle, DigestAlgorithm, TransformStream};
use crate::config::Config;
use crate::errors::{header_safe, TransferError};
use crate::metrics::BYTES_RECEIVED_TOTAL;

// -- Settings -----------------------------------------------------------------

/// Read-only knobs shared by every handler.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Upper bound for the backend to consume an upload.
    pub response_timeout: Duration,
    /// Upper bound for draining a failed upload.
    pub max_wait: Duration,
    /// Chunk size for the response pump.
    pub buffer_size: usize,
    pub compression_level: i32,
    /// Reported in `x-relaystore-module` on errors.
    pub module: String,
}

impl TransferSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            response_timeout: config.transfer.response_timeout(),
            max_wait: config.transfer.max_wait(),
            buffer_size: config.transfer.buffer_size.max(1024),
            compression_level: config.transfer.compression_level,
            module: config.server.module.clone(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// -- Pull sources and outcomes --------------------------------------------------

/// The byte source behind a download.
pub enum PullReader {
    Raw(Box<dyn Read + Send>),
    Transform(TransformStream),
}

/// What a resource hands back for a download.
pub struct PullSource {
    reader: PullReader,
    compressed: bool,
}

impl PullSource {
    pub fn raw<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: PullReader::Raw(Box::new(reader)),
            compressed: false,
        }
    }

    pub fn transform(stream: TransformStream) -> Self {
        Self {
            reader: PullReader::Transform(stream),
            compressed: false,
        }
    }

    /// Mark the bytes as already zstd-compressed; they are sent untouched.
    pub fn already_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }
}

/// Body of a finished transfer.
pub enum OutcomeBody {
    Empty,
    Json(serde_json::Value),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for OutcomeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeBody::Empty => f.write_str("Empty"),
            OutcomeBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            OutcomeBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Status, headers and body produced by the handler.
#[derive(Debug)]
pub struct TransferOutcome {
    pub status: StatusCode,
    pub headers: HeaderFields,
    pub body: OutcomeBody,
}

impl TransferOutcome {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A failed transfer: the error response is already built.
#[derive(Debug)]
pub struct ErrorOutcome {
    pub outcome: TransferOutcome,
    pub error: TransferError,
}

// -- Hooks --------------------------------------------------------------------

/// Resource-specific behaviour plugged into the engine.
///
/// Push hooks default to refusing, so pull-only resources only implement
/// the download side.
pub trait StreamHooks: Send + 'static {
    /// Business key of the request (bucket/name, an order, a filter...).
    type Input: Send + 'static;
    /// JSON answer of a successful upload.
    type Output: Serialize;

    /// Whether an upload without a declared hash should be digested.
    fn check_digest_to_compute(&self, _input: &Self::Input) -> bool {
        false
    }

    /// Admission checks, then start the backend write.  The stream may be
    /// consumed on another thread; it is not read when this returns.
    fn check_push_able(
        &mut self,
        _input: &Self::Input,
        _stream: TransformStream,
    ) -> Result<(), TransferError> {
        Err(TransferError::not_acceptable("upload is not supported here"))
    }

    /// Business answer once the backend has consumed everything.
    fn get_answer_push_input_stream(
        &mut self,
        _input: &Self::Input,
        _final_hash: Option<&str>,
        _final_size: u64,
    ) -> Result<Self::Output, TransferError> {
        Err(TransferError::not_acceptable("upload is not supported here"))
    }

    fn get_header_push_input_stream(
        &mut self,
        _input: &Self::Input,
        _final_hash: Option<&str>,
        _final_size: u64,
        _output: &Self::Output,
    ) -> Result<HeaderFields, TransferError> {
        Ok(HeaderFields::new())
    }

    /// False turns the download into a 404.
    fn check_pull_able(
        &mut self,
        input: &Self::Input,
        request_headers: &HeaderMap,
    ) -> Result<bool, TransferError>;

    fn get_pull_input_stream(&mut self, input: &Self::Input) -> Result<PullSource, TransferError>;

    fn get_header_pull_input_stream(
        &mut self,
        input: &Self::Input,
    ) -> Result<HeaderFields, TransferError>;

    /// Headers describing the business key on error responses.
    fn get_header_error(&self, input: &Self::Input, status: StatusCode) -> HeaderFields;
}

// -- Closer -------------------------------------------------------------------

/// Gives up every watched transfer that has not completed when the
/// handler goes away, whatever path ended the request.
#[derive(Default)]
struct Closer {
    watched: Vec<CompletionHandle>,
}

impl Closer {
    fn watch(&mut self, handle: CompletionHandle) {
        self.watched.push(handle);
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        for handle in &self.watched {
            if handle.abort() {
                debug!("released unfinished transfer stream");
            }
        }
    }
}

// -- Handler ------------------------------------------------------------------

/// One request's worth of transfer protocol.
pub struct TransferHandler<H: StreamHooks> {
    hooks: H,
    input: H::Input,
    session: TransferSession,
    settings: TransferSettings,
    request_headers: HeaderMap,
    closer: Closer,
}

impl<H: StreamHooks> TransferHandler<H> {
    pub fn new(
        hooks: H,
        input: H::Input,
        session: TransferSession,
        settings: TransferSettings,
        request_headers: HeaderMap,
    ) -> Self {
        Self {
            hooks,
            input,
            session,
            settings,
            request_headers,
            closer: Closer::default(),
        }
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Receive `body` and hand it to the backend.  Answers `201` with the
    /// business output as JSON once the backend consumed everything.
    pub fn upload<R: Read + Send + 'static>(
        mut self,
        body: R,
    ) -> Result<TransferOutcome, ErrorOutcome> {
        let span = self.session.span().clone();
        let _entered = span.enter();
        if self.session.direction() != Direction::Upload {
            let err = TransferError::InvalidState("upload on a download session");
            return Err(self.fail(err, None));
        }
        let stream = TransformStream::new(body);
        let completion = stream.completion();
        self.closer.watch(completion.clone());
        match self.run_upload(stream, &completion) {
            Ok(outcome) => {
                info!(status = outcome.status.as_u16(), "upload finished");
                Ok(outcome)
            }
            Err(err) => Err(self.fail(err, Some(&completion))),
        }
    }

    fn run_upload(
        &mut self,
        mut stream: TransformStream,
        completion: &CompletionHandle,
    ) -> Result<TransferOutcome, TransferError> {
        if self.session.must_decompress_in() {
            stream.enable_decompress()?;
        }
        let digest = self.session.declared_hash().is_none()
            && self.hooks.check_digest_to_compute(&self.input);
        if digest {
            stream.enable_digest(DigestAlgorithm::Sha256)?;
        }
        debug!(
            declared_length = self.session.declared_length(),
            decompress = self.session.must_decompress_in(),
            digest,
            "upload prepared"
        );

        self.hooks.check_push_able(&self.input, stream)?;
        let final_size = completion.wait_for_completion(self.settings.response_timeout)?;
        counter!(BYTES_RECEIVED_TOTAL).increment(final_size);

        let final_hash = if digest {
            Some(completion.digest_base32()?)
        } else {
            self.session.declared_hash().map(str::to_string)
        };
        let output = self.hooks.get_answer_push_input_stream(
            &self.input,
            final_hash.as_deref(),
            final_size,
        )?;
        let mut headers = self.hooks.get_header_push_input_stream(
            &self.input,
            final_hash.as_deref(),
            final_size,
            &output,
        )?;
        let body = serde_json::to_value(&output).map_err(|e| TransferError::Internal(e.into()))?;
        headers.insert(
            header::CONTENT_TYPE.as_str().to_string(),
            APPLICATION_JSON.to_string(),
        );
        self.finish_headers(&mut headers);
        Ok(TransferOutcome {
            status: StatusCode::CREATED,
            headers,
            body: OutcomeBody::Json(body),
        })
    }

    /// Stream a business object back, after `check_pull_able` agreed.
    pub fn pull(mut self) -> Result<TransferOutcome, ErrorOutcome> {
        let span = self.session.span().clone();
        let _entered = span.enter();
        let result = match self.hooks.check_pull_able(&self.input, &self.request_headers) {
            Ok(true) => self.stream_out(),
            Ok(false) => Err(TransferError::not_found("Item not found")),
            Err(e) => Err(e),
        };
        result.map_err(|e| self.fail(e, None))
    }

    /// Stream a listing.  Listings are not existence-gated.
    pub fn pull_list(mut self) -> Result<TransferOutcome, ErrorOutcome> {
        let span = self.session.span().clone();
        let _entered = span.enter();
        self.stream_out().map_err(|e| self.fail(e, None))
    }

    fn stream_out(&mut self) -> Result<TransferOutcome, TransferError> {
        if self.session.direction() != Direction::Download {
            return Err(TransferError::InvalidState("download on an upload session"));
        }
        let source = self.hooks.get_pull_input_stream(&self.input)?;
        let mut headers = self.hooks.get_header_pull_input_stream(&self.input)?;

        let wants_zstd = self.session.negotiated_compress_out();
        let compress = wants_zstd && !source.compressed;
        if wants_zstd || source.compressed {
            if !wants_zstd {
                warn!("source is already compressed but the peer did not ask for it");
            }
            headers.insert(
                header::CONTENT_ENCODING.as_str().to_string(),
                COMPRESSION_ZSTD.to_string(),
            );
        }
        let level = self.settings.compression_level;
        let body: Box<dyn Read + Send> = match (source.reader, compress) {
            (PullReader::Transform(mut stream), true) => {
                stream.enable_compress(level)?;
                Box::new(stream)
            }
            (PullReader::Transform(stream), false) => Box::new(stream),
            (PullReader::Raw(reader), true) => Box::new(CompressingReader::new(reader, level)?),
            (PullReader::Raw(reader), false) => reader,
        };

        headers.insert(
            header::TRANSFER_ENCODING.as_str().to_string(),
            CHUNKED.to_string(),
        );
        self.finish_headers(&mut headers);
        debug!(compress, "download streaming");
        Ok(TransferOutcome {
            status: StatusCode::OK,
            headers,
            body: OutcomeBody::Stream(body),
        })
    }

    fn finish_headers(&self, headers: &mut HeaderFields) {
        headers.insert(X_OP_ID.to_string(), self.session.op_id().to_string());
        if !self.session.keep_alive() {
            headers.insert(
                header::CONNECTION.as_str().to_string(),
                CONNECTION_CLOSE.to_string(),
            );
        }
    }

    /// Build the error response for `err`.  A started upload is drained
    /// for a bounded time so the connection can be closed cleanly.
    fn fail(&mut self, err: TransferError, upload: Option<&CompletionHandle>) -> ErrorOutcome {
        let status = err.status_code();
        if err.is_business() {
            info!(status = status.as_u16(), kind = err.kind(), error = %err, "transfer refused");
        } else {
            error!(status = status.as_u16(), kind = err.kind(), error = ?err, "transfer failed");
        }

        if let Some(completion) = upload {
            if completion.has_started() && !completion.is_complete() {
                completion.drain(self.settings.max_wait);
            } else {
                completion.abort();
            }
        }

        let mut headers = self.hooks.get_header_error(&self.input, status);
        headers.insert(X_OP_ID.to_string(), self.session.op_id().to_string());
        headers.insert(X_ERROR.to_string(), header_safe(&err.to_string()));
        headers.insert(X_MODULE.to_string(), self.settings.module.clone());
        headers.insert(
            header::CONNECTION.as_str().to_string(),
            CONNECTION_CLOSE.to_string(),
        );
        ErrorOutcome {
            outcome: TransferOutcome {
                status,
                headers,
                body: OutcomeBody::Empty,
            },
            error: err,
        }
    }
}
