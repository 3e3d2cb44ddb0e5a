//! Shared per-device state
//!
//! A [`DeviceHandle`] lives behind an `Arc`. The attachment, the handle
//! table, every open [`FileContext`](crate::FileContext) and every request
//! still held by the transport own one reference each. Destruction (which
//! releases the transport and the inbound buffer) happens in `Drop`, so it
//! runs exactly once, on whichever thread lets go of the last reference.
//!
//! Locking:
//!
//! - `io` serializes readers, writers and lifecycle transitions against the
//!   attachment reference. Only foreground paths take it; it may be held
//!   across blocking operations.
//! - `status` guards everything completion context writes. It is held only
//!   for field updates and buffer copies, never across a wait or a submit.

use crate::anchor::Anchor;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::sync::{IoMutex, Monitor, Semaphore, lock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};
use transport::{
    CompletionHandler, DeviceId, EndpointDescriptor, Rejected, RequestId, TransferRequest,
    TransferStatus, Transport,
};

/// How long a forced cancellation waits for the transport to report back
pub(crate) const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// State written by completion context
pub(crate) struct Status {
    /// Last completion error not yet reported to a caller
    pub(crate) last_error: Option<TransferStatus>,
    /// An inbound request is outstanding
    pub(crate) ongoing_read: bool,
    /// Id of the outstanding inbound request
    pub(crate) inbound: Option<RequestId>,
    /// Inbound buffer; lent to the transport while a read is outstanding
    pub(crate) buffer: Vec<u8>,
    /// Bytes the last inbound transfer delivered
    pub(crate) filled: usize,
    /// Bytes of `filled` already copied out to callers
    pub(crate) consumed: usize,
    /// Set by detach so parked readers stop waiting
    pub(crate) disconnected: bool,
}

impl Status {
    /// Read-and-clear the recorded error
    pub(crate) fn take_error(&mut self) -> Option<DriverError> {
        self.last_error.take().map(DriverError::from_status)
    }
}

/// Snapshot of the inbound buffer offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState {
    pub capacity: usize,
    pub filled: usize,
    pub consumed: usize,
    pub ongoing_read: bool,
}

impl BufferState {
    /// Bytes buffered and not yet delivered
    pub fn available(&self) -> usize {
        self.filled - self.consumed
    }
}

/// Shared state for one attached bulk endpoint pair
pub struct DeviceHandle {
    pub(crate) transport: Box<dyn Transport>,
    device_id: DeviceId,
    /// Bound interface number; `None` once detached
    interface: Mutex<Option<u8>>,
    pub(crate) bulk_in: EndpointDescriptor,
    pub(crate) bulk_out: EndpointDescriptor,
    pub(crate) bulk_in_size: usize,
    pub(crate) max_transfer: usize,
    drain_timeout: Duration,
    pub(crate) io: IoMutex,
    pub(crate) status: Arc<Monitor<Status>>,
    pub(crate) admission: Semaphore,
    pub(crate) in_flight: Anchor,
    next_request: AtomicU64,
    power_usage: AtomicUsize,
}

impl DeviceHandle {
    /// Build the device state for a freshly bound transport
    ///
    /// Uses the first bulk-in and first bulk-out endpoint of the active
    /// interface setting; the inbound buffer is sized to the bulk-in
    /// endpoint's max packet size.
    pub(crate) fn new(transport: Box<dyn Transport>, config: &DriverConfig) -> Result<Arc<Self>> {
        let interface = transport.interface();
        let device_id = transport.device_id();

        let Some((bulk_in, bulk_out)) = interface.find_bulk_pair() else {
            warn!(
                "Device {} interface {} lacks a bulk-in/bulk-out pair",
                device_id, interface.number
            );
            return Err(DriverError::UnsupportedDevice(format!(
                "interface {} of {} has no bulk-in and bulk-out endpoints",
                interface.number, device_id
            )));
        };

        let bulk_in_size = usize::from(bulk_in.max_packet_size);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bulk_in_size)
            .map_err(|_| DriverError::OutOfMemory)?;

        debug!(
            "Device {}: bulk-in {:#04x} ({} bytes), bulk-out {:#04x}",
            device_id, bulk_in.address, bulk_in_size, bulk_out.address
        );

        Ok(Arc::new(Self {
            transport,
            device_id,
            interface: Mutex::new(Some(interface.number)),
            bulk_in,
            bulk_out,
            bulk_in_size,
            max_transfer: config.max_transfer,
            drain_timeout: config.drain_timeout(),
            io: IoMutex::new(),
            status: Arc::new(Monitor::new(Status {
                last_error: None,
                ongoing_read: false,
                inbound: None,
                buffer,
                filled: 0,
                consumed: 0,
                disconnected: false,
            })),
            admission: Semaphore::new(config.writes_in_flight),
            in_flight: Anchor::new(),
            next_request: AtomicU64::new(1),
            power_usage: AtomicUsize::new(0),
        }))
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Whether the transport is still bound
    pub fn is_attached(&self) -> bool {
        lock(&self.interface).is_some()
    }

    /// Capacity of the inbound buffer
    pub fn bulk_in_size(&self) -> usize {
        self.bulk_in_size
    }

    /// Largest number of bytes one write call transfers
    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    pub fn buffer_state(&self) -> BufferState {
        let status = self.status.lock();
        BufferState {
            capacity: self.bulk_in_size,
            filled: status.filled,
            consumed: status.consumed,
            ongoing_read: status.ongoing_read,
        }
    }

    /// Outbound requests submitted and not yet completed
    pub fn writes_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Write permits currently free
    pub fn available_permits(&self) -> usize {
        self.admission.available()
    }

    /// Open files holding a power reference
    pub fn power_usage(&self) -> usize {
        self.power_usage.load(Ordering::SeqCst)
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn completion_handler(self: &Arc<Self>) -> Arc<dyn CompletionHandler> {
        Arc::clone(self) as Arc<dyn CompletionHandler>
    }

    /// Fail with `Detached` once the transport is gone
    ///
    /// Callers hold the I/O mutex so the answer stays valid until they
    /// release it.
    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(DriverError::Detached)
        }
    }

    /// Report a recorded completion error once
    pub(crate) fn take_error(&self) -> Result<()> {
        match self.status.lock().take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn submit_inbound(&self, request: TransferRequest) -> std::result::Result<(), Rejected> {
        trace!(
            "Submitting read {} ({} bytes) on {:#04x}",
            request.id(),
            request.len(),
            request.endpoint()
        );
        self.transport.submit(request)
    }

    pub(crate) fn submit_outbound(&self, request: TransferRequest) -> std::result::Result<(), Rejected> {
        trace!(
            "Submitting write {} ({} bytes) on {:#04x}",
            request.id(),
            request.len(),
            request.endpoint()
        );
        self.transport.submit(request)
    }

    /// Cancel the outstanding inbound request, if any, and wait for it
    pub(crate) fn kill_read(&self) {
        let Some(id) = self.status.lock().inbound else {
            return;
        };
        self.transport.cancel(id);

        let status = self.status.lock();
        let (_status, finished) = self
            .status
            .wait_timeout_until(status, CANCEL_GRACE, |status| status.inbound != Some(id));
        if !finished {
            warn!("Read {} still outstanding after cancellation", id);
        }
    }

    /// Quiesce all in-flight work
    ///
    /// Gives outstanding writes the configured grace period, cancels any
    /// that remain, then cancels the outstanding read.
    pub(crate) fn draw_down(&self) {
        if !self.in_flight.wait_empty_timeout(self.drain_timeout) {
            debug!(
                "Drain timed out after {:?} with {} writes outstanding",
                self.drain_timeout,
                self.in_flight.len()
            );
            self.in_flight
                .kill_all(self.transport.as_ref(), CANCEL_GRACE);
        }
        self.kill_read();
    }

    /// Record the reset-class error seen by the next caller
    pub(crate) fn note_reset(&self) {
        self.status.lock().last_error = Some(TransferStatus::Stall);
    }

    /// Unbind from the transport and cancel everything outstanding
    pub(crate) fn disconnect(&self) {
        // No new submissions can start once the reference is gone
        {
            let _io = self.io.lock();
            *lock(&self.interface) = None;
        }

        self.status.lock().disconnected = true;
        self.status.notify_all();
        self.admission.close();

        self.in_flight
            .kill_all(self.transport.as_ref(), CANCEL_GRACE);
        self.kill_read();
    }

    pub(crate) fn power_get(&self) {
        self.power_usage.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop a power reference taken at open; only meaningful while attached
    pub(crate) fn power_put(&self) {
        let _io = self.io.lock();
        if self.is_attached() {
            let _ = self
                .power_usage
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        debug!(
            "Releasing device {} ({} byte inbound buffer)",
            self.device_id, self.bulk_in_size
        );
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device_id", &self.device_id)
            .field("attached", &self.is_attached())
            .field("bulk_in", &format_args!("{:#04x}", self.bulk_in.address))
            .field("bulk_out", &format_args!("{:#04x}", self.bulk_out.address))
            .field("writes_in_flight", &self.writes_in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::MockTransport;
    use transport::{EndpointKind, InterfaceDescriptor};

    #[test]
    fn test_new_sizes_buffer_from_bulk_in() {
        let mock = MockTransport::with_bulk_endpoints(64, 512);
        let device = DeviceHandle::new(Box::new(mock), &DriverConfig::default()).unwrap();

        assert_eq!(device.bulk_in_size(), 64);
        assert_eq!(device.buffer_state().capacity, 64);
        assert_eq!(device.available_permits(), 8);
        assert!(device.is_attached());
    }

    #[test]
    fn test_new_rejects_missing_bulk_out() {
        let mock = MockTransport::new(InterfaceDescriptor {
            number: 0,
            alt_setting: 0,
            endpoints: vec![EndpointDescriptor::new(0x81, EndpointKind::Bulk, 64)],
        });
        let err = DeviceHandle::new(Box::new(mock.clone()), &DriverConfig::default()).unwrap_err();

        assert!(matches!(err, DriverError::UnsupportedDevice(_)));
        assert!(mock.is_released());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let device = DeviceHandle::new(Box::new(mock), &DriverConfig::default()).unwrap();
        let a = device.next_request_id();
        let b = device.next_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_drop_releases_transport() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let device = DeviceHandle::new(Box::new(mock.clone()), &DriverConfig::default()).unwrap();
        assert!(!mock.is_released());

        drop(device);
        assert!(mock.is_released());
    }
}
