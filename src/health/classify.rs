//! Coarse error taxonomy for observability.
//!
//! Classification never influences retry decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    DataMissing,
    AccessDenied,
    NotFound,
    ServerError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::DataMissing => "data_missing",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substring heuristics; the first match wins.
pub fn classify_error(error: &str) -> ErrorKind {
    let e = error.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| e.contains(n));

    if has(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if has(&["connection", "network"]) {
        ErrorKind::Network
    } else if has(&["keyerror"]) {
        ErrorKind::DataMissing
    } else if has(&["403", "forbidden"]) {
        ErrorKind::AccessDenied
    } else if has(&["404", "not found"]) {
        ErrorKind::NotFound
    } else if has(&["500", "502", "503"]) {
        ErrorKind::ServerError
    } else {
        ErrorKind::Unknown
    }
}
