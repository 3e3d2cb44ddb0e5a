//! Minor-number registry
//!
//! Maps minor numbers to attached devices. Opening a file looks the device
//! up here; detaching removes it so no new file can reach it, while files
//! already open keep their own reference.

use crate::config::DriverConfig;
use crate::device::DeviceHandle;
use crate::error::{DriverError, Result};
use crate::file::{FileContext, OpenOptions};
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use tracing::debug;

struct TableInner {
    config: DriverConfig,
    slots: Vec<Option<Arc<DeviceHandle>>>,
}

/// Registry of attached devices, keyed by minor number
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct HandleTable {
    inner: Arc<Mutex<TableInner>>,
}

impl HandleTable {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TableInner {
                config: config.clone(),
                slots: vec![None; config.max_minors as usize],
            })),
        }
    }

    /// Claim the lowest free minor for `device`
    pub(crate) fn register(&self, device: Arc<DeviceHandle>) -> Result<u32> {
        let mut inner = lock(&self.inner);
        let index = inner
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(DriverError::NoFreeMinor)?;
        inner.slots[index] = Some(device);

        let minor = inner.config.minor_base + index as u32;
        debug!("Registered minor {}", minor);
        Ok(minor)
    }

    /// Remove the device registered at `minor`
    pub(crate) fn deregister(&self, minor: u32) -> Option<Arc<DeviceHandle>> {
        let mut inner = lock(&self.inner);
        let index = minor.checked_sub(inner.config.minor_base)? as usize;
        let device = inner.slots.get_mut(index)?.take();
        if device.is_some() {
            debug!("Released minor {}", minor);
        }
        device
    }

    pub(crate) fn lookup(&self, minor: u32) -> Option<Arc<DeviceHandle>> {
        let inner = lock(&self.inner);
        let index = minor.checked_sub(inner.config.minor_base)? as usize;
        inner.slots.get(index)?.clone()
    }

    /// Open the device at `minor` with default options
    pub fn open(&self, minor: u32) -> Result<FileContext> {
        OpenOptions::new().open(self, minor)
    }

    /// Node name for `minor`, e.g. `ugci0` for the first minor
    pub fn node_name(&self, minor: u32) -> String {
        let inner = lock(&self.inner);
        let index = minor.saturating_sub(inner.config.minor_base);
        inner.config.format_node_name(index)
    }

    /// Minors that currently have a device registered
    pub fn minors(&self) -> Vec<u32> {
        let inner = lock(&self.inner);
        inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| inner.config.minor_base + index as u32)
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("minors", &self.minors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::MockTransport;

    fn device() -> Arc<DeviceHandle> {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        DeviceHandle::new(Box::new(mock), &DriverConfig::default()).unwrap()
    }

    #[test]
    fn test_register_takes_lowest_free_minor() {
        let table = HandleTable::new(&DriverConfig::default());

        assert_eq!(table.register(device()).unwrap(), 66);
        assert_eq!(table.register(device()).unwrap(), 67);
        assert!(table.deregister(66).is_some());
        assert_eq!(table.register(device()).unwrap(), 66);
        assert_eq!(table.minors(), vec![66, 67]);
    }

    #[test]
    fn test_exhaustion() {
        let config = DriverConfig {
            max_minors: 1,
            ..DriverConfig::default()
        };
        let table = HandleTable::new(&config);

        table.register(device()).unwrap();
        assert!(matches!(
            table.register(device()),
            Err(DriverError::NoFreeMinor)
        ));
    }

    #[test]
    fn test_lookup_out_of_range() {
        let table = HandleTable::new(&DriverConfig::default());
        assert!(table.lookup(0).is_none());
        assert!(table.lookup(66 + 16).is_none());
        assert!(table.deregister(3).is_none());
    }

    #[test]
    fn test_node_name() {
        let table = HandleTable::new(&DriverConfig::default());
        assert_eq!(table.node_name(66), "ugci0");
        assert_eq!(table.node_name(68), "ugci2");
    }
}
