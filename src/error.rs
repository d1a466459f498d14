use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidSlot(String),

    #[error("{0}")]
    InvalidDate(String),

    /// The only recoverable condition: callers re-list the slots and pick another time.
    #[error("Slot {time} on {date} is fully booked")]
    SlotFull { date: String, time: String },

    #[error("Appointment can only be edited while it is scheduled (current status: {0})")]
    NotEditable(String),

    #[error("Status transition from {from} to {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Validation(_)
            | BookingError::InvalidSlot(_)
            | BookingError::InvalidDate(_) => StatusCode::BAD_REQUEST,
            BookingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::SlotFull { .. }
            | BookingError::NotEditable(_)
            | BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(err = %self, "Request failed");
        } else {
            warn!(err = %self, %status, "Request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_case::test_case(BookingError::Validation("bad plate".into()), StatusCode::BAD_REQUEST)]
    #[test_case::test_case(BookingError::InvalidSlot("07:00".into()), StatusCode::BAD_REQUEST)]
    #[test_case::test_case(BookingError::InvalidDate("past".into()), StatusCode::BAD_REQUEST)]
    #[test_case::test_case(BookingError::SlotFull { date: "2025-08-20".into(), time: "09:00".into() }, StatusCode::CONFLICT)]
    #[test_case::test_case(BookingError::NotEditable("cancelado".into()), StatusCode::CONFLICT)]
    #[test_case::test_case(BookingError::InvalidTransition { from: "cancelado".into(), to: "agendado".into() }, StatusCode::CONFLICT)]
    #[test_case::test_case(BookingError::NotFound("Appointment".into()), StatusCode::NOT_FOUND)]
    #[test_case::test_case(BookingError::Unauthorized("Missing credentials".into()), StatusCode::UNAUTHORIZED)]
    #[test_case::test_case(BookingError::Forbidden("not yours".into()), StatusCode::FORBIDDEN)]
    #[test_case::test_case(BookingError::Storage("connection lost".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_codes(err: BookingError, expected: StatusCode) {
        assert_eq!(err.status_code(), expected);
        assert_eq!(err.into_response().status(), expected);
    }

    #[test]
    fn test_slot_full_message() {
        let err = BookingError::SlotFull {
            date: "2025-08-20".into(),
            time: "09:00".into(),
        };
        assert_eq!(err.to_string(), "Slot 09:00 on 2025-08-20 is fully booked");
    }
}
