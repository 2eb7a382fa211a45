//! Configuration types for sessions

use serde::{Deserialize, Serialize};

use crate::pool::DEFAULT_REQUEST_SIZE;

/// Per-session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Expected message size in bytes; sizes pooled frame buffers
    pub request_size: usize,

    /// Maximum number of frames dispatched concurrently.
    ///
    /// When reached, the read loop stops reading until a dispatch finishes.
    /// `None` leaves dispatch unbounded.
    pub max_in_flight: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_size: DEFAULT_REQUEST_SIZE,
            max_in_flight: None,
        }
    }
}
