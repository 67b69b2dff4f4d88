//! Room coordinator error types.
//!
//! Every inbound command resolves to `Result<_, RcError>`. The session turns an
//! `Err` into a single `error` event for the originating connection using
//! [`RcError::error_code`] and [`RcError::client_message`]. Store and internal
//! details are logged server-side but never sent to clients.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Room coordinator error type.
///
/// Expected, user-facing conditions (reported as an `error` event, the
/// connection stays open):
/// - `RoomNotFound`, `RoomInactive`, `NotAParticipant`, `NotInRoom`
/// - `Forbidden`, `CannotRemoveSelf`, `WaitingEntryNotFound`, `BadRequest`
///
/// Failures (logged, reported with a generic message):
/// - `Store`, `Internal`, `RoomClosed`, `Config`
///
/// `Unauthenticated` and `ServiceUnavailable` never reach an open connection:
/// they refuse the upgrade.
#[derive(Debug, Error)]
pub enum RcError {
    /// Credential missing, malformed, expired or badly signed.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The persisted room does not exist.
    #[error("Room not found")]
    RoomNotFound,

    /// The persisted room exists but is not active.
    #[error("Room is not active")]
    RoomInactive,

    /// No active participant record for (user, room).
    #[error("Not a participant of this room")]
    NotAParticipant,

    /// Sender has no live presence in the room.
    #[error("Not in room")]
    NotInRoom,

    /// Caller is not the room host (or the room could not be resolved).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Host tried to remove themself.
    #[error("Cannot remove yourself")]
    CannotRemoveSelf,

    /// Approve/reject for a user with no waiting-room entry.
    #[error("Waiting room entry not found")]
    WaitingEntryNotFound,

    /// Frame could not be decoded into a command.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Connection limit reached; the upgrade is refused.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// External store call failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A room actor shut down while a command was addressed to it.
    #[error("Room actor closed")]
    RoomClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the stable code sent in `error` events and used as a metric label.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RcError::Unauthenticated(_) => "UNAUTHENTICATED",
            RcError::RoomNotFound => "ROOM_NOT_FOUND",
            RcError::RoomInactive => "ROOM_INACTIVE",
            RcError::NotAParticipant => "NOT_A_PARTICIPANT",
            RcError::NotInRoom => "NOT_IN_ROOM",
            RcError::Forbidden(_) => "FORBIDDEN",
            RcError::CannotRemoveSelf => "CANNOT_REMOVE_SELF",
            RcError::WaitingEntryNotFound => "WAITING_ENTRY_NOT_FOUND",
            RcError::BadRequest(_) => "BAD_REQUEST",
            RcError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            RcError::Store(_) => "STORE_FAILURE",
            RcError::RoomClosed | RcError::Config(_) | RcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Unauthenticated(_) => "Authentication required".to_string(),
            RcError::RoomNotFound => "Room not found".to_string(),
            RcError::RoomInactive => "Room is not active".to_string(),
            RcError::NotAParticipant => "You are not a participant of this room".to_string(),
            RcError::NotInRoom => "You are not in this room".to_string(),
            RcError::Forbidden(msg) | RcError::BadRequest(msg) => msg.clone(),
            RcError::CannotRemoveSelf => "You cannot remove yourself".to_string(),
            RcError::WaitingEntryNotFound => "Waiting room entry not found".to_string(),
            RcError::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            RcError::Store(_) | RcError::RoomClosed | RcError::Config(_) | RcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Whether this error is an expected, user-facing condition.
    ///
    /// Expected conditions are logged at debug level; everything else at error.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            RcError::Store(_) | RcError::RoomClosed | RcError::Config(_) | RcError::Internal(_)
        )
    }

    /// HTTP status used when the error refuses a WebSocket upgrade.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            RcError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            RcError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RcError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RcError::Forbidden(_) | RcError::CannotRemoveSelf => StatusCode::FORBIDDEN,
            RcError::RoomNotFound | RcError::WaitingEntryNotFound => StatusCode::NOT_FOUND,
            RcError::RoomInactive | RcError::NotAParticipant | RcError::NotInRoom => {
                StatusCode::CONFLICT
            }
            RcError::Store(_) | RcError::RoomClosed | RcError::Config(_) | RcError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(
                    "Bearer realm=\"room-coordinator\", error=\"invalid_token\"",
                ),
            );
        }

        response
    }
}

impl From<sqlx::Error> for RcError {
    fn from(err: sqlx::Error) -> Self {
        RcError::Store(err.to_string())
    }
}
