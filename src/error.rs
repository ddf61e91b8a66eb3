use serde::Serialize;
use thiserror::Error;

use crate::types::StopId;

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    PreconditionFailed,
    UpstreamUnavailable,
    Timeout,
}

/// Navigation core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No stops to navigate")]
    NoStops,

    #[error("No filtered position available")]
    NoPosition,

    #[error("Planning requires a start position")]
    NoStartPosition,

    #[error("Navigation is not active")]
    NotActive,

    #[error("Unknown stop id {0}")]
    UnknownStop(StopId),

    #[error("Request superseded by a newer command")]
    Superseded,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NavError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NavError::InvalidInput(_) | NavError::UnknownStop(_) => ErrorKind::InvalidInput,
            NavError::NoStops
            | NavError::NoPosition
            | NavError::NoStartPosition
            | NavError::NotActive
            | NavError::Superseded
            | NavError::Cancelled
            | NavError::Internal(_) => ErrorKind::PreconditionFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, NavError>;

/// Routing oracle failures. Always recovered per segment by the stitcher.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum RoutingError {
    #[error("Routing request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Rate limited by routing service")]
    RateLimited,

    #[error("No route between points")]
    NoRoute,

    #[error("Failed to decode route: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoutingError::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::UpstreamUnavailable,
        }
    }
}
