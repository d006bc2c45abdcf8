//! Error types for forward management and JSON error responses for the API

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which side of a forward a validation error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Base,
    Remote,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Base => f.write_str("Base"),
            Endpoint::Remote => f.write_str("Remote"),
        }
    }
}

/// Failures surfaced to the user through the pending error slot.
///
/// The `Display` text is the exact message shown on the status page.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Invalid {endpoint} IP address format: {value}")]
    InvalidIp { endpoint: Endpoint, value: String },

    #[error("{endpoint} Port must be a number: {value}")]
    PortNotNumber { endpoint: Endpoint, value: String },

    #[error("{endpoint} Port must be between 1 and 65535, got: {value}")]
    PortOutOfRange { endpoint: Endpoint, value: i64 },

    #[error("Failed to start {program}: '{program}' command not found in PATH. Please ensure {program} is installed.")]
    ToolNotFound { program: String },

    #[error("Failed to start {program} (check if address/port is already in use or {program} permissions): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process with ID {0} not found.")]
    NotFound(String),
}

impl ForwardError {
    /// True for errors raised before any spawn attempt
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ForwardError::InvalidIp { .. }
                | ForwardError::PortNotNumber { .. }
                | ForwardError::PortOutOfRange { .. }
        )
    }

    /// API error code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            ForwardError::InvalidIp { .. }
            | ForwardError::PortNotNumber { .. }
            | ForwardError::PortOutOfRange { .. } => ErrorCode::InvalidRequest,
            ForwardError::ToolNotFound { .. } => ErrorCode::ForwarderNotFound,
            ForwardError::Spawn { .. } => ErrorCode::SpawnFailed,
            ForwardError::NotFound(_) => ErrorCode::UnknownForward,
        }
    }
}

/// Error codes for the JSON API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request body or field
    InvalidRequest,
    /// Forwarding executable missing from PATH
    ForwarderNotFound,
    /// Forwarding executable could not be spawned
    SpawnFailed,
    /// No forward with the given id
    UnknownForward,
    /// Route exists but not for this method
    MethodNotAllowed,
    /// Unknown API route
    NotFound,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ForwarderNotFound => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::SpawnFailed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UnknownForward => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Get the error code as a string for the X-Forward-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ForwarderNotFound => "FORWARDER_NOT_FOUND",
            ErrorCode::SpawnFailed => "SPAWN_FAILED",
            ErrorCode::UnknownForward => "UNKNOWN_FORWARD",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::NotFound => "NOT_FOUND",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Forward-Error header
pub fn json_error_response(code: ErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let error = ErrorResponse::new(code, message);

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Forward-Error", code.as_header_value())
        .body(Full::new(Bytes::from(error.to_json())))
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        let err = ForwardError::InvalidIp {
            endpoint: Endpoint::Base,
            value: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid Base IP address format: nope");

        let err = ForwardError::PortNotNumber {
            endpoint: Endpoint::Remote,
            value: "ssh".to_string(),
        };
        assert_eq!(err.to_string(), "Remote Port must be a number: ssh");

        let err = ForwardError::PortOutOfRange {
            endpoint: Endpoint::Base,
            value: 65536,
        };
        assert_eq!(
            err.to_string(),
            "Base Port must be between 1 and 65535, got: 65536"
        );
    }

    #[test]
    fn test_spawn_messages_name_program() {
        let err = ForwardError::ToolNotFound {
            program: "socat".to_string(),
        };
        assert!(err.to_string().contains("'socat' command not found in PATH"));

        let err = ForwardError::Spawn {
            program: "socat".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("Failed to start socat (check if"));
    }

    #[test]
    fn test_error_classification() {
        let not_found = ForwardError::NotFound("abc".to_string());
        assert!(!not_found.is_validation());
        assert_eq!(not_found.code(), ErrorCode::UnknownForward);
        assert_eq!(not_found.to_string(), "Process with ID abc not found.");

        let invalid = ForwardError::PortOutOfRange {
            endpoint: Endpoint::Remote,
            value: 0,
        };
        assert!(invalid.is_validation());
        assert_eq!(invalid.code().status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_response_json() {
        let error = ErrorResponse::new(ErrorCode::UnknownForward, "Process with ID x not found.");
        let json = error.to_json();

        assert!(json.contains("\"code\":\"UNKNOWN_FORWARD\""));
        assert!(json.contains("\"status\":404"));
    }

    #[test]
    fn test_json_error_response_headers() {
        let response = json_error_response(ErrorCode::SpawnFailed, "boom");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("X-Forward-Error").unwrap(),
            "SPAWN_FAILED"
        );
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }
}
