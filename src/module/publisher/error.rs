use crate::domain::ValidationError;
use crate::library::communication::BrokerError;
use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};

/// Reasons why an event could not be accepted
#[derive(Error, Debug)]
pub enum PublishError {
    /// Request body exceeds the configured ceiling
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Maximum permitted size in bytes
        limit: u64,
    },
    /// Request body is not a JSON object of the expected shape
    #[error("request body is malformed")]
    BadPayload(#[source] serde_json::Error),
    /// Event violates a field constraint
    #[error("event is invalid")]
    Validation(#[from] ValidationError),
    /// Envelope could not be serialized
    #[error("unable to encode event")]
    Encoding(#[source] serde_json::Error),
    /// Event could not be handed to the broker
    #[error("unable to publish event")]
    Broker(#[from] BrokerError),
}

/// Single violated constraint
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    field: String,
    #[serde(rename = "type")]
    detail_type: &'static str,
    message: String,
}

/// Body of all error responses
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    status: u16,
    #[serde(rename = "type")]
    error_type: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<ErrorDetail>,
}

impl ErrorResponse {
    pub(super) fn new(
        status: StatusCode,
        error_type: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: status.as_u16(),
            error_type,
            message: message.into(),
            details: Vec::new(),
        }
    }

    fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Converts the body into a reply carrying the matching status code
    pub fn into_reply(self) -> WithStatus<Json> {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        reply::with_status(reply::json(&self), status)
    }
}

impl From<&PublishError> for ErrorResponse {
    fn from(error: &PublishError) -> Self {
        match error {
            PublishError::PayloadTooLarge { limit } => ErrorResponse::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request_body_too_large",
                format!("Request body too large, limit is {} bytes", limit),
            ),
            PublishError::BadPayload(error) => ErrorResponse::new(
                StatusCode::BAD_REQUEST,
                "bad_payload_syntax",
                format!("Request body is malformed: {}", error),
            ),
            PublishError::Validation(violation) => {
                let detail_type = match violation {
                    ValidationError::MissingField { .. } => "missing_field",
                    ValidationError::InvalidField { .. } => "invalid_field",
                };

                ErrorResponse::new(
                    StatusCode::BAD_REQUEST,
                    "validation_violation",
                    "Validation of the event failed",
                )
                .with_detail(ErrorDetail {
                    field: violation.field().to_owned(),
                    detail_type,
                    message: violation.to_string(),
                })
            }
            PublishError::Encoding(_) | PublishError::Broker(_) => ErrorResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                "Unable to publish the event",
            ),
        }
    }
}
