//! Transfer error taxonomy.
//!
//! Every variant maps to an HTTP status.  Business hooks raise the typed
//! client/server variants; the engine itself raises timeouts, codec and
//! state errors.  The enum implements [`axum::response::IntoResponse`],
//! producing the header-only error block used on binary endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::transfer::headers::{generate_op_id, CONNECTION_CLOSE, X_ERROR, X_MODULE, X_OP_ID};

/// Errors surfaced by the transfer engine and its business hooks.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The addressed item does not exist (or is not readable yet).
    #[error("{message}")]
    NotFound { message: String },

    /// The item already exists.
    #[error("{message}")]
    AlreadyExists { message: String },

    /// The item existed and has been deleted.
    #[error("{message}")]
    Deleted { message: String },

    /// The request is understood but refused in the current state.
    #[error("{message}")]
    NotAcceptable { message: String },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// Any other 4xx carried through unchanged.
    #[error("{message}")]
    Client { status: StatusCode, message: String },

    /// Any 5xx carried through unchanged.
    #[error("{message}")]
    Server { status: StatusCode, message: String },

    /// The backend did not finish consuming the body in time.
    #[error("{0}")]
    OperationTimeout(String),

    /// A compressed stream was malformed or could not be produced.
    #[error("codec failure: {0}")]
    Codec(#[source] std::io::Error),

    /// Contract misuse, e.g. reading the digest before completion.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TransferError {
    pub fn not_found(message: impl Into<String>) -> Self {
        TransferError::NotFound {
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        TransferError::AlreadyExists {
            message: message.into(),
        }
    }

    /// The item exists in a state that forbids the operation.
    pub fn conflict(message: impl Into<String>) -> Self {
        TransferError::Client {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn deleted(message: impl Into<String>) -> Self {
        TransferError::Deleted {
            message: message.into(),
        }
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        TransferError::NotAcceptable {
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        TransferError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Rebuild a typed error from a status code, e.g. one returned by a
    /// peer site.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::NOT_FOUND => TransferError::NotFound { message },
            StatusCode::CONFLICT => TransferError::AlreadyExists { message },
            StatusCode::GONE => TransferError::Deleted { message },
            StatusCode::NOT_ACCEPTABLE => TransferError::NotAcceptable { message },
            StatusCode::BAD_REQUEST => TransferError::InvalidArgument { message },
            s if s.is_client_error() => TransferError::Client { status, message },
            s if s.is_server_error() => TransferError::Server { status, message },
            _ => TransferError::Server {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message,
            },
        }
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransferError::NotFound { .. } => StatusCode::NOT_FOUND,
            TransferError::AlreadyExists { .. } => StatusCode::CONFLICT,
            TransferError::Deleted { .. } => StatusCode::GONE,
            TransferError::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            TransferError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            TransferError::Client { status, .. } | TransferError::Server { status, .. } => *status,
            TransferError::OperationTimeout(_)
            | TransferError::Codec(_)
            | TransferError::InvalidState(_)
            | TransferError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Business errors are expected outcomes and are logged quietly.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            TransferError::NotFound { .. }
                | TransferError::AlreadyExists { .. }
                | TransferError::Deleted { .. }
                | TransferError::NotAcceptable { .. }
                | TransferError::InvalidArgument { .. }
                | TransferError::Client { .. }
                | TransferError::Server { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::NotFound { .. } => "not_found",
            TransferError::AlreadyExists { .. } => "already_exists",
            TransferError::Deleted { .. } => "deleted",
            TransferError::NotAcceptable { .. } => "not_acceptable",
            TransferError::InvalidArgument { .. } => "invalid_argument",
            TransferError::Client { .. } => "client",
            TransferError::Server { .. } => "server",
            TransferError::OperationTimeout(_) => "timeout",
            TransferError::Codec(_) => "codec",
            TransferError::InvalidState(_) => "state",
            TransferError::Internal(_) => "internal",
        }
    }
}

/// Make a message safe to carry in a header value.
pub fn header_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect()
}

/// Header-only error response: status, message, module, operation id and
/// `Connection: close`.
pub fn error_response(err: &TransferError, op_id: &str, module: &str) -> Response {
    (
        err.status_code(),
        [
            (X_OP_ID, header_safe(op_id)),
            (X_ERROR, header_safe(&err.to_string())),
            (X_MODULE, header_safe(module)),
            ("connection", CONNECTION_CLOSE.to_string()),
        ],
    )
        .into_response()
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        error_response(&self, &generate_op_id(), "relaystore")
    }
}
