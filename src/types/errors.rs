//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Only
//! programmer/config failures travel as `Error`; upstream I/O failures are
//! carried inside result envelopes instead.

use axum::http::StatusCode;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the view service.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller arguments or plan shape are invalid (HTTP 400).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown tool, view or route (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed manifest, view definition or environment value.
    #[error("config error: {0}")]
    Config(String),

    /// Upstream failure surfaced to a caller that asked for a raw result.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal errors, including recovered panics.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache encoding errors.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP client construction or transport errors.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration extraction errors (boxed to reduce Result size).
    #[error("config error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl Error {
    /// Map to the HTTP status used by the view surface.
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Csv(_)
            | Error::Http(_)
            | Error::Figment(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Config(_) | Error::Figment(_) => "CONFIG",
            Error::Upstream(_) => "UNAVAILABLE",
            Error::Serialization(_) => "INVALID_ARGUMENT",
            Error::Internal(_) | Error::Io(_) | Error::Csv(_) | Error::Http(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
