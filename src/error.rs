//! Crate-wide error handling.
//!
//! Most of the conditions named in a production dialog SDK (lookup misses,
//! stale result-sink notifications, policy inversions) are recovered
//! locally and only ever surface as log events or state transitions, never
//! as a value returned to a caller above the component boundary that
//! recovered them. `CoreError` covers the handful of conditions that *do*
//! need to reach a caller.

use std::{error::Error, fmt};

pub use crate::{directive::router::RouterError, focus::manager::FocusError};

/// Top-level error type for fallible public operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A directive router batch registration/deregistration failed.
    Router(RouterError),
    /// A focus manager channel configuration was rejected.
    Focus(FocusError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Router(e) => write!(f, "directive router error: {}", e),
            CoreError::Focus(e) => write!(f, "focus manager error: {}", e),
        }
    }
}

impl Error for CoreError {}

impl From<RouterError> for CoreError {
    fn from(e: RouterError) -> Self {
        CoreError::Router(e)
    }
}

impl From<FocusError> for CoreError {
    fn from(e: FocusError) -> Self {
        CoreError::Focus(e)
    }
}

/// Convenience alias for fallible core operations.
pub type CoreResult<T> = Result<T, CoreError>;
