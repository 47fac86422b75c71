//! # slotsync-core
//!
//! Core types, configuration, and error handling shared by the slotsync
//! capture and render pipelines.

pub mod config;
pub mod error;
pub mod format;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use format::{ByteOrder, PcmFormat, Signedness};
