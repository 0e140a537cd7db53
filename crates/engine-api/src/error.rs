use std::fmt::Display;
use std::str::Utf8Error;

use axum::{http::StatusCode, response::IntoResponse};
use custody_core::{AddError, control::ControlError};
use hyper::http;
use thiserror::Error;

#[derive(Debug)]
pub enum EngineApiError {
    InternalServerError,
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InsufficientStorage(String),
}

/// Error types for the Engine API client
#[derive(Debug, Error)]
pub enum EngineClientError {
    #[error("Unix socket not found: {0}")]
    SocketNotFound(String),

    #[error("Failed to get metadata: {0}")]
    FailedToGetMetadata(String),

    #[error("No write permission: {0}")]
    NoWritePermission(String),

    #[error("No read permission: {0}")]
    NoReadPermission(String),

    #[error("Not a unix socket: {0}")]
    NotASocket(String),

    #[error("C string conversion error: {0}")]
    CStringConversion(#[from] std::ffi::NulError),

    #[error("Hyper client error: {0}")]
    HyperError(#[from] hyper_util::client::legacy::Error),

    #[error("Error collecting response: {0}")]
    CollectResponseError(#[from] hyper::Error),

    #[error("Failed to build request: {0}")]
    RequestBuilderError(#[from] http::Error),

    #[error("Serialization error: {0}")]
    SerializeError(String),

    #[error("Deserialization error: {0}")]
    DeserializeError(String),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] Utf8Error),

    /// The daemon answered with an error status.
    #[error("HTTP error {status}: {message}")]
    UnexpectedResponse { status: u16, message: String },
}

impl Display for EngineApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl EngineApiError {
    fn status_code(&self) -> StatusCode {
        match *self {
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
        }
    }
}

impl IntoResponse for EngineApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();

        match self {
            Self::InternalServerError => (status_code, "internal").into_response(),
            Self::BadRequest(err)
            | Self::NotFound(err)
            | Self::Conflict(err)
            | Self::InsufficientStorage(err) => (status_code, err).into_response(),
        }
    }
}

impl From<ControlError> for EngineApiError {
    fn from(error: ControlError) -> Self {
        match &error {
            ControlError::Registry(err) => match err {
                AddError::InvalidItem => Self::BadRequest(error.to_string()),
                AddError::NoParent => Self::NotFound(error.to_string()),
                AddError::AlreadyExists | AddError::Forbidden | AddError::TreeDead => {
                    Self::Conflict(error.to_string())
                }
                AddError::CapacityExhausted | AddError::Uninitialized => {
                    Self::InsufficientStorage(error.to_string())
                }
            },
            ControlError::ProcessNotRunning(_) => Self::NotFound(error.to_string()),
            ControlError::Termination { .. } => {
                log::error!("Unexpected Error {error:?}");
                Self::InternalServerError
            }
        }
    }
}
