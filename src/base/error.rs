//! Error taxonomy for the kChat REST API and the backend built on top of it.
//!
//! Most of the crate propagates `anyhow` errors; these typed errors exist where a
//! caller needs to tell failures apart (e.g., a missing user versus a permission problem).

use thiserror::Error;

/// Result type for kChat REST calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures returned by the kChat REST API, mapped from the HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid or missing parameters: {0}")]
    InvalidOrMissingParameters(String),
    #[error("no access token provided: {0}")]
    NoAccessTokenProvided(String),
    #[error("not enough permissions: {0}")]
    NotEnoughPermissions(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("content too large: {0}")]
    ContentTooLarge(String),
    #[error("feature disabled: {0}")]
    FeatureDisabled(String),
    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Maps an HTTP status code and server message to the matching error.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => ApiError::InvalidOrMissingParameters(message),
            401 => ApiError::NoAccessTokenProvided(message),
            403 => ApiError::NotEnoughPermissions(message),
            404 => ApiError::ResourceNotFound(message),
            405 => ApiError::MethodNotAllowed(message),
            413 => ApiError::ContentTooLarge(message),
            501 => ApiError::FeatureDisabled(message),
            status => ApiError::Unexpected { status, message },
        }
    }

    /// Whether this is one of the errors kChat returns for a rejected request
    /// (bad parameters or a bot account lacking rights).
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::InvalidOrMissingParameters(_) | ApiError::NotEnoughPermissions(_))
    }
}

/// Failures raised by the backend itself.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("user does not exist: {0}")]
    UserDoesNotExist(String),
    #[error("room does not exist: {0}")]
    RoomDoesNotExist(String),
    #[error("room error: {0}")]
    Room(String),
    #[error("invalid or unsupported kChat identifier: {0}")]
    InvalidIdentifier(String),
}

impl BackendError {
    /// Wraps an API error raised during a room operation.
    pub fn room(err: ApiError) -> Self {
        if matches!(err, ApiError::NotEnoughPermissions(_)) {
            return BackendError::Room(format!("{err} (the bot account may need administrator rights)"));
        }

        BackendError::Room(err.to_string())
    }
}
