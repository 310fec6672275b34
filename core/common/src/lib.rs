//! Common utilities and types shared across the plexaccess crates.
//!
//! This module provides the error taxonomy every layer reports through,
//! and the zeroizing byte wrapper used to hand secrets around.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::SensitiveBytes;
