//! Attach, detach, power and reset transitions
//!
//! An [`Attachment`] exists exactly as long as the transport is bound.
//! Dropping it is the detach: it unregisters the minor, clears the
//! attachment reference under the I/O mutex and cancels all outstanding
//! work. The device itself is freed once the last open file lets go.

use crate::config::DriverConfig;
use crate::device::DeviceHandle;
use crate::error::Result;
use crate::sync::{IoGuard, lock};
use crate::table::HandleTable;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use transport::Transport;

/// A bound device, registered under a minor number
pub struct Attachment {
    device: Arc<DeviceHandle>,
    table: HandleTable,
    minor: u32,
    node_name: String,
    /// I/O mutex held from `pre_reset` until `post_reset`
    reset_guard: Mutex<Option<IoGuard>>,
}

impl Attachment {
    /// Bind `transport` and register it in `table`
    ///
    /// On failure everything built so far is released again, including
    /// the transport.
    pub fn attach(
        transport: Box<dyn Transport>,
        table: &HandleTable,
        config: &DriverConfig,
    ) -> Result<Self> {
        config.validate()?;

        let device = DeviceHandle::new(transport, config)?;
        let minor = table.register(Arc::clone(&device))?;
        let node_name = table.node_name(minor);

        info!(
            "Bulk device {} now attached to {} (minor {})",
            device.device_id(),
            node_name,
            minor
        );

        Ok(Self {
            device,
            table: table.clone(),
            minor,
            node_name,
            reset_guard: Mutex::new(None),
        })
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }

    /// Open files holding the device awake
    pub fn power_usage(&self) -> usize {
        self.device.power_usage()
    }

    /// Whether the device may be autosuspended
    pub fn is_idle(&self) -> bool {
        self.power_usage() == 0
    }

    /// Quiesce before the device is suspended
    pub fn suspend(&self) {
        debug!("Suspending {}", self.node_name);
        self.device.draw_down();
    }

    /// Nothing to restart; the next read or write submits on demand
    pub fn resume(&self) {
        debug!("Resuming {}", self.node_name);
    }

    /// Block I/O and quiesce ahead of a device reset
    ///
    /// The I/O mutex stays held until [`Attachment::post_reset`].
    pub fn pre_reset(&self) {
        let guard = self.device.io.lock();
        self.device.draw_down();
        *lock(&self.reset_guard) = Some(guard);
        debug!("{} quiesced for reset", self.node_name);
    }

    /// Resume I/O after a reset
    ///
    /// The next read, write or flush fails with
    /// [`DriverError::DeviceReset`](crate::DriverError::DeviceReset) so
    /// callers learn about it.
    pub fn post_reset(&self) {
        self.device.note_reset();
        let guard = lock(&self.reset_guard).take();
        if guard.is_none() {
            warn!("post_reset on {} without pre_reset", self.node_name);
        }
        drop(guard);
    }

    /// Unbind the device
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        // New opens fail from here on
        self.table.deregister(self.minor);

        // A reset that never finished must not keep the I/O mutex
        drop(lock(&self.reset_guard).take());

        self.device.disconnect();
        info!("{} now disconnected", self.node_name);
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("minor", &self.minor)
            .field("node_name", &self.node_name)
            .field("device", &self.device)
            .finish()
    }
}
