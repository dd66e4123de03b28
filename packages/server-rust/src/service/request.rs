//! Transport-neutral request and response types handled by the dispatcher.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::operation::Outcome;

/// One inbound call.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Cancelled when the caller goes away.
    pub cancel: CancellationToken,
    /// Absolute deadline; `None` means unbounded.
    pub deadline: Option<Instant>,
}

impl DispatchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a dispatch ended, independent of the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Completed,
    NotFound,
    ValidationFailure,
    Rejected,
    PersistenceConflict,
    InternalError,
    Cancelled,
    DeadlineExceeded,
    Overloaded,
}

impl ResponseKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NotFound => "not_found",
            Self::ValidationFailure => "validation_failure",
            Self::Rejected => "rejected",
            Self::PersistenceConflict => "persistence_conflict",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Overloaded => "overloaded",
        }
    }
}

/// Non-standard status for a request whose client went away (logged only).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// `Retry-After` advertised on an overloaded response.
pub const OVERLOADED_RETRY_AFTER: Duration = Duration::from_secs(1);

/// The dispatcher's answer to a [`DispatchRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub request_id: Uuid,
    pub status: StatusCode,
    /// JSON body; `Value::Null` means no body.
    pub body: Value,
    pub kind: ResponseKind,
    /// Attempts made, including the first. Zero when the request never ran.
    pub attempts: u32,
    /// Rendered as a `Retry-After` header.
    pub retry_after: Option<Duration>,
}

fn error_body(error: &str, message: impl Into<String>) -> Value {
    json!({ "error": error, "message": message.into() })
}

impl DispatchResponse {
    /// Maps a chain outcome onto a response.
    #[must_use]
    pub fn from_outcome(request_id: Uuid, outcome: Outcome, attempts: u32) -> Self {
        let (status, body, kind) = match outcome {
            Outcome::Success { status, body } => (status, body, ResponseKind::Completed),
            Outcome::NotFound(message) => (
                StatusCode::NOT_FOUND,
                error_body("not_found", message),
                ResponseKind::NotFound,
            ),
            Outcome::ValidationFailure(message) => (
                StatusCode::BAD_REQUEST,
                error_body("validation_failure", message),
                ResponseKind::ValidationFailure,
            ),
            Outcome::Rejected(message) => (
                StatusCode::CONFLICT,
                error_body("rejected", message),
                ResponseKind::Rejected,
            ),
            Outcome::PersistenceConflict { attempts } => (
                StatusCode::CONFLICT,
                error_body(
                    "persistence_conflict",
                    format!("write conflict persisted after {attempts} attempts"),
                ),
                ResponseKind::PersistenceConflict,
            ),
        };
        Self {
            request_id,
            status,
            body,
            kind,
            attempts,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn internal_error(request_id: Uuid, attempts: u32) -> Self {
        Self {
            request_id,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: error_body("internal_error", "internal error"),
            kind: ResponseKind::InternalError,
            attempts,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn cancelled(request_id: Uuid, attempts: u32) -> Self {
        Self {
            request_id,
            status: StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            body: error_body("cancelled", "client closed request"),
            kind: ResponseKind::Cancelled,
            attempts,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn deadline_exceeded(request_id: Uuid, attempts: u32) -> Self {
        Self {
            request_id,
            status: StatusCode::GATEWAY_TIMEOUT,
            body: error_body("deadline_exceeded", "operation deadline exceeded"),
            kind: ResponseKind::DeadlineExceeded,
            attempts,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn overloaded(request_id: Uuid) -> Self {
        Self {
            request_id,
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: error_body("overloaded", "server overloaded, try again later"),
            kind: ResponseKind::Overloaded,
            attempts: 0,
            retry_after: Some(OVERLOADED_RETRY_AFTER),
        }
    }
}
