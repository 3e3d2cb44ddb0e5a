//! Common utilities for bulkdev
//!
//! Shared between the driver core and the `bulkcat` tool: logging setup,
//! error types, and the in-memory transport used by tests.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
