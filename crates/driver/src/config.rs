//! Driver tuning knobs

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of outbound requests allowed in flight per device
pub const WRITES_IN_FLIGHT: usize = 8;

/// Default upper bound for a single write call
///
/// Keeps staging allocations under a page while still holding a whole
/// number of 512-byte high-speed packets.
pub const MAX_TRANSFER: usize = 4096 - 512;

/// Default time a drain waits for outstanding writes before cancelling them
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// First minor number handed out by a [`HandleTable`](crate::HandleTable)
pub const MINOR_BASE: u32 = 66;

/// Driver configuration
///
/// Every field has a default, so an empty `[driver]` table is valid.
///
/// # Example Configuration
/// ```toml
/// [driver]
/// writes_in_flight = 8
/// max_transfer = 3584
/// drain_timeout_ms = 1000
/// minor_base = 66
/// max_minors = 16
/// node_name = "ugci%d"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Outbound requests allowed in flight per device
    pub writes_in_flight: usize,
    /// Largest number of bytes a single write call transfers
    pub max_transfer: usize,
    /// Drain grace period for outstanding writes, in milliseconds
    pub drain_timeout_ms: u64,
    /// First minor number of the handle table
    pub minor_base: u32,
    /// Number of minors the handle table manages
    pub max_minors: u32,
    /// Device node name pattern; `%d` is replaced by the node index
    pub node_name: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            writes_in_flight: WRITES_IN_FLIGHT,
            max_transfer: MAX_TRANSFER,
            drain_timeout_ms: DRAIN_TIMEOUT.as_millis() as u64,
            minor_base: MINOR_BASE,
            max_minors: 16,
            node_name: "ugci%d".to_string(),
        }
    }
}

impl DriverConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Reject settings the driver cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.writes_in_flight == 0 {
            return Err(DriverError::Config(
                "writes_in_flight must be at least 1".to_string(),
            ));
        }
        if self.max_transfer == 0 {
            return Err(DriverError::Config(
                "max_transfer must be at least 1".to_string(),
            ));
        }
        if self.max_minors == 0 {
            return Err(DriverError::Config(
                "max_minors must be at least 1".to_string(),
            ));
        }
        if self.minor_base.checked_add(self.max_minors).is_none() {
            return Err(DriverError::Config(format!(
                "minor range {}+{} overflows",
                self.minor_base, self.max_minors
            )));
        }
        Ok(())
    }

    /// Node name for the `index`-th device of the table
    pub fn format_node_name(&self, index: u32) -> String {
        if self.node_name.contains("%d") {
            self.node_name.replacen("%d", &index.to_string(), 1)
        } else {
            format!("{}{}", self.node_name, index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.writes_in_flight, 8);
        assert_eq!(config.max_transfer, 3584);
        assert_eq!(config.drain_timeout(), Duration::from_secs(1));
        assert_eq!(config.minor_base, 66);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_permits() {
        let config = DriverConfig {
            writes_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DriverError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_minor_overflow() {
        let config = DriverConfig {
            minor_base: u32::MAX,
            max_minors: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DriverConfig = toml::from_str("writes_in_flight = 2\n").unwrap();
        assert_eq!(config.writes_in_flight, 2);
        assert_eq!(config.max_transfer, MAX_TRANSFER);
        assert_eq!(config.node_name, "ugci%d");
    }

    #[test]
    fn test_format_node_name() {
        let config = DriverConfig::default();
        assert_eq!(config.format_node_name(0), "ugci0");

        let config = DriverConfig {
            node_name: "bulk".to_string(),
            ..Default::default()
        };
        assert_eq!(config.format_node_name(3), "bulk3");
    }
}
