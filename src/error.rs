//! Error taxonomy (§7 of the design).
//!
//! Two kinds of failure cross the wire and therefore must be serializable:
//! a user thunk raising, and a serialization failure while replying to a
//! `sync`/`fetch`. Everything else (connection loss, malformed frames) stays
//! process-local and is reported through [`color_eyre::Report`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-local result type for fallible runtime operations (connecting,
/// binding listeners, cluster bootstrap). Never sent over the wire.
pub type RunResult<T> = color_eyre::Result<T>;

/// A thunk failure, or a serialization failure that stands in for one so
/// that a waiting requester unblocks instead of hanging forever (§4.5,
/// "Result delivery").
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ThunkError {
    pub message: String,
}

impl ThunkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_display(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }
}

impl From<&str> for ThunkError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ThunkError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
