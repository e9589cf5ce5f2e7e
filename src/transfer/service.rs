//! Async adapter between axum and the blocking [`TransferHandler`].
//!
//! Each call moves the handler onto a blocking worker, then turns its
//! outcome into an axum [`Response`].  Error outcomes built by the handler
//! are returned as they are; anything else (a panicking hook) becomes a
//! generic header-only error response.

use std::io::{self, Read};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, error, warn, Instrument, Span};

use super::handler::{ErrorOutcome, OutcomeBody, StreamHooks, TransferHandler, TransferOutcome};
use crate::errors::{error_response, TransferError};
use crate::metrics::{BYTES_SENT_TOTAL, TRANSFERS_TOTAL};

/// Run an upload: the request body is bridged into a blocking reader.
pub async fn upload<H: StreamHooks>(handler: TransferHandler<H>, body: Body) -> Response {
    let reader = body_reader(body);
    run(handler, "upload", move |handler| handler.upload(reader)).await
}

/// Run a download of one business object.
pub async fn pull<H: StreamHooks>(handler: TransferHandler<H>) -> Response {
    run(handler, "download", TransferHandler::pull).await
}

/// Run a listing download.
pub async fn pull_list<H: StreamHooks>(handler: TransferHandler<H>) -> Response {
    run(handler, "list", TransferHandler::pull_list).await
}

/// Blocking reader over an axum request body.  Must be called from within
/// the runtime.
pub fn body_reader(body: Body) -> impl Read + Send + 'static {
    let chunks = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    SyncIoBridge::new(StreamReader::new(chunks))
}

async fn run<H, F>(handler: TransferHandler<H>, operation: &'static str, work: F) -> Response
where
    H: StreamHooks,
    F: FnOnce(TransferHandler<H>) -> Result<TransferOutcome, ErrorOutcome> + Send + 'static,
{
    let op_id = handler.session().op_id().to_string();
    let span = handler.session().span().clone();
    let module = handler.settings().module.clone();
    let buffer_size = handler.settings().buffer_size;

    let joined = tokio::task::spawn_blocking(move || work(handler))
        .instrument(span.clone())
        .await;
    let response = match joined {
        Ok(Ok(outcome)) => into_response(outcome, buffer_size, span),
        Ok(Err(failure)) => into_response(failure.outcome, buffer_size, span),
        Err(join_error) => {
            let err =
                TransferError::Internal(anyhow::anyhow!("transfer worker failed: {join_error}"));
            span.in_scope(|| error!(error = %err, "transfer worker did not return"));
            error_response(&err, &op_id, &module)
        }
    };
    counter!(
        TRANSFERS_TOTAL,
        "operation" => operation,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

/// Turn a handler outcome into a response.
pub fn into_response(outcome: TransferOutcome, buffer_size: usize, span: Span) -> Response {
    let body = match outcome.body {
        OutcomeBody::Empty => Body::empty(),
        OutcomeBody::Json(value) => Body::from(value.to_string()),
        OutcomeBody::Stream(reader) => stream_body(reader, buffer_size, span),
    };
    let mut response = Response::new(body);
    *response.status_mut() = outcome.status;
    let headers = response.headers_mut();
    for (name, value) in outcome.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping header that is not valid on the wire"),
        }
    }
    response
}

/// Pump a blocking reader into a streaming body.  A read failure after
/// the status line went out can only abort the connection.
fn stream_body(mut reader: Box<dyn Read + Send>, buffer_size: usize, span: Span) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);
    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut sent = 0u64;
        loop {
            let mut buf = BytesMut::zeroed(buffer_size);
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    sent += n as u64;
                    if tx.blocking_send(Ok(buf.freeze())).is_err() {
                        debug!(sent, "client went away during download");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, sent, "download aborted after headers were sent");
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
        counter!(BYTES_SENT_TOTAL).increment(sent);
    });
    let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Body::from_stream(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::handler::{PullSource, TransferSettings};
    use crate::transfer::headers::{HeaderFields, X_ERROR, X_MODULE, X_OP_ID};
    use crate::transfer::session::{Direction, TransferSession};
    use crate::transfer::stream::TransformStream;
    use axum::http::{HeaderMap, StatusCode};
    use std::io::Cursor;

    /// Serves a fixed payload, or panics when asked to.
    struct Fixed {
        data: Vec<u8>,
        panic: bool,
    }

    impl StreamHooks for Fixed {
        type Input = ();
        type Output = u64;

        fn check_push_able(
            &mut self,
            _input: &(),
            mut stream: TransformStream,
        ) -> Result<(), TransferError> {
            std::thread::spawn(move || std::io::copy(&mut stream, &mut std::io::sink()));
            Ok(())
        }

        fn get_answer_push_input_stream(
            &mut self,
            _input: &(),
            _final_hash: Option<&str>,
            final_size: u64,
        ) -> Result<u64, TransferError> {
            Ok(final_size)
        }

        fn check_pull_able(
            &mut self,
            _input: &(),
            _headers: &HeaderMap,
        ) -> Result<bool, TransferError> {
            if self.panic {
                panic!("hook exploded");
            }
            Ok(true)
        }

        fn get_pull_input_stream(&mut self, _input: &()) -> Result<PullSource, TransferError> {
            Ok(PullSource::raw(Cursor::new(self.data.clone())))
        }

        fn get_header_pull_input_stream(
            &mut self,
            _input: &(),
        ) -> Result<HeaderFields, TransferError> {
            let mut headers = HeaderFields::new();
            headers.insert("bad header name".to_string(), "x".to_string());
            Ok(headers)
        }

        fn get_header_error(&self, _input: &(), _status: StatusCode) -> HeaderFields {
            HeaderFields::new()
        }
    }

    fn handler(hooks: Fixed, direction: Direction) -> TransferHandler<Fixed> {
        let mut headers = HeaderMap::new();
        headers.insert(X_OP_ID, HeaderValue::from_static("op-test"));
        let session = TransferSession::setup(&headers, direction, 0, None, false);
        let settings = TransferSettings {
            buffer_size: 1024,
            ..TransferSettings::default()
        };
        TransferHandler::new(hooks, (), session, settings, headers)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_streams_in_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let hooks = Fixed {
            data: data.clone(),
            panic: false,
        };
        let response = pull(handler(hooks, Direction::Download)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_OP_ID).unwrap(), "op-test");
        assert!(response.headers().get("bad header name").is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upload_bridges_request_body() {
        let hooks = Fixed {
            data: Vec::new(),
            panic: false,
        };
        let response = upload(handler(hooks, Direction::Upload), Body::from("hello world")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"11");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_hook_becomes_generic_error() {
        let hooks = Fixed {
            data: Vec::new(),
            panic: true,
        };
        let response = pull(handler(hooks, Direction::Download)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let headers = response.headers();
        assert_eq!(headers.get(X_OP_ID).unwrap(), "op-test");
        assert_eq!(headers.get(X_MODULE).unwrap(), "accessor");
        assert!(headers.get(X_ERROR).is_some());
        assert_eq!(headers.get("connection").unwrap(), "close");
    }
}
