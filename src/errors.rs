use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Message used whenever the portal answers with an HTTP error.
pub const MSG_SERVICE_UNAVAILABLE: &str = "INPS services are unavailable";
/// Message used when the portal rejected the CAPTCHA or the identifiers.
pub const MSG_INVALID_INPUT: &str = "The submitted data is not valid";
/// Message used when the session mechanism no longer looks the way we expect.
pub const MSG_UNEXPECTED_PROTOCOL: &str = "INPS services are not answering as expected: \
     they may be temporarily offline or the authentication flow may have changed";
/// Message used when the certificate page cannot be decoded.
pub const MSG_BAD_RESPONSE: &str = "The certificate response is not valid";

/// Machine-distinguishable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ServiceUnavailable,
    UnexpectedProtocol,
    InvalidInput,
    BadResponse,
    PropertyNotFound,
    BadRequest,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, used in JSON error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::UnexpectedProtocol => "unexpected_protocol",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::BadResponse => "bad_response",
            ErrorKind::PropertyNotFound => "property_not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// The portal answered with an HTTP status >= 400, or could not be reached.
    ServiceUnavailable(String),
    /// The session cookie was missing from the portal's answer.
    UnexpectedProtocol(String),
    /// The portal rejected the CAPTCHA solution or the identifiers.
    InvalidInput(String),
    /// The certificate page did not match the known layout.
    BadResponse(String),
    /// A certificate field was requested by a name that does not exist.
    PropertyNotFound(String),
    /// Bad request error (caller input failed local validation).
    BadRequest(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Returns the category of the error, looking through any context chain.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            AppError::UnexpectedProtocol(_) => ErrorKind::UnexpectedProtocol,
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::BadResponse(_) => ErrorKind::BadResponse,
            AppError::PropertyNotFound(_) => ErrorKind::PropertyNotFound,
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::InternalError(_) => ErrorKind::Internal,
            AppError::WithContext { source, .. } => source.kind(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UnexpectedProtocol | ErrorKind::BadResponse => StatusCode::BAD_GATEWAY,
            ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::PropertyNotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::UnexpectedProtocol(msg) => write!(f, "Unexpected protocol: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::BadResponse(msg) => write!(f, "Bad response: {}", msg),
            AppError::PropertyNotFound(name) => write!(f, "Property not found: {}", name),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Upstream failures are logged here; the JSON body carries the message
    /// and the stable error kind so callers can branch on it.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        let error_message = match &self {
            AppError::ServiceUnavailable(msg)
            | AppError::UnexpectedProtocol(msg)
            | AppError::BadResponse(msg) => {
                tracing::error!("Upstream error ({}): {}", kind.as_str(), msg);
                self.to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                "Unauthorized".to_string()
            }
            AppError::WithContext { .. } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {}", self);
                self.to_string()
            }
            AppError::InvalidInput(_)
            | AppError::PropertyNotFound(_)
            | AppError::BadRequest(_) => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind.as_str(),
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    /// Transport failures (connect, timeout, body read) count as the portal being unavailable.
    fn from(err: reqwest::Error) -> Self {
        AppError::ServiceUnavailable(format!("{}: {}", MSG_SERVICE_UNAVAILABLE, err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}
