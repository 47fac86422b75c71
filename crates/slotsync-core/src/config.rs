//! Synchronizer configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of slots in the reference design.
pub const DEFAULT_SLOT_COUNT: usize = 5;

/// Time window covered by one slot in the reference design.
pub const DEFAULT_WINDOW_MS: u64 = 20;

/// Longest accepted slot window.
pub const MAX_WINDOW_MS: u64 = 1000;

/// Shape of the slot pool shared by a synchronizer and its driver endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of equal-capacity slots allocated at open.
    pub slot_count: usize,
    /// Milliseconds of audio held by one slot. Also bounds how long a
    /// capture `read` waits for data.
    pub window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl SyncConfig {
    pub const fn new(slot_count: usize, window_ms: u64) -> Self {
        Self {
            slot_count,
            window_ms,
        }
    }

    /// Slot time window as a `Duration`.
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::Config("slot_count must be at least 1".into()));
        }
        if self.window_ms == 0 || self.window_ms > MAX_WINDOW_MS {
            return Err(Error::Config(format!(
                "window_ms must be between 1 and {MAX_WINDOW_MS}, got {}",
                self.window_ms
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
