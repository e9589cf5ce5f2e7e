//! Streaming object transfer engine.
//!
//! Moves object bytes between an HTTP peer and a blocking backend in both
//! directions, with on-the-fly zstd (de)compression, SHA-256 digesting and
//! a completion barrier that tells the request handler when the backend
//! has consumed an upload.
//!
//! - [`stream`]: the transforming stream and its completion barrier.
//! - [`codec`]: standalone streaming zstd readers.
//! - [`session`]: per-request state negotiated from headers.
//! - [`handler`]: upload/download state machines and the resource hooks.
//! - [`service`]: the async adapter used by the axum routes.

pub mod codec;
pub mod handler;
pub mod headers;
pub mod service;
pub mod session;
pub mod stream;

pub use handler::{
    ErrorOutcome, OutcomeBody, PullSource, StreamHooks, TransferHandler, TransferOutcome,
    TransferSettings,
};
pub use headers::HeaderFields;
pub use session::{Direction, TransferSession};
pub use stream::{CompletionHandle, DigestAlgorithm, TransformStream};
