//! Bulk transfer execution
//!
//! Runs one driver request at a time with rusb's synchronous API and maps
//! the outcome onto a [`TransferStatus`].

use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, trace};
use transport::{TransferRequest, TransferStatus};

/// Slice length for inbound reads; cancellation is checked between slices
pub const READ_SLICE: Duration = Duration::from_millis(100);

/// Read into the request's buffer until data arrives or `is_cancelled` holds
///
/// Bulk-in requests have no deadline of their own, matching how the driver
/// expects them to behave.
pub fn execute_inbound(
    handle: &DeviceHandle<Context>,
    request: &mut TransferRequest,
    is_cancelled: impl Fn() -> bool,
) -> (TransferStatus, usize) {
    let endpoint = request.endpoint();
    let Some(buffer) = request.inbound_buffer_mut() else {
        return (TransferStatus::Io, 0);
    };

    loop {
        if is_cancelled() {
            return (TransferStatus::Cancelled, 0);
        }

        match handle.read_bulk(endpoint, buffer, READ_SLICE) {
            Ok(len) => {
                trace!("Bulk IN {:#04x}: {} bytes", endpoint, len);
                return (TransferStatus::Completed, len);
            }
            Err(rusb::Error::Timeout) => continue,
            Err(e) => {
                debug!("Bulk IN {:#04x} failed: {}", endpoint, e);
                return (map_rusb_error(e), 0);
            }
        }
    }
}

/// Send the request's payload; `timeout` of zero waits forever
pub fn execute_outbound(
    handle: &DeviceHandle<Context>,
    request: &TransferRequest,
    timeout: Duration,
) -> (TransferStatus, usize) {
    let endpoint = request.endpoint();
    let Some(payload) = request.payload() else {
        return (TransferStatus::Io, 0);
    };

    match handle.write_bulk(endpoint, payload, timeout) {
        Ok(len) => {
            trace!("Bulk OUT {:#04x}: {} of {} bytes", endpoint, len, payload.len());
            (TransferStatus::Completed, len)
        }
        Err(e) => {
            debug!("Bulk OUT {:#04x} failed: {}", endpoint, e);
            (map_rusb_error(e), 0)
        }
    }
}

/// Map rusb::Error to the transfer status the driver understands
pub fn map_rusb_error(err: rusb::Error) -> TransferStatus {
    match err {
        rusb::Error::Pipe => TransferStatus::Stall,
        rusb::Error::NoDevice => TransferStatus::Shutdown,
        rusb::Error::Timeout => TransferStatus::Timeout,
        rusb::Error::Overflow => TransferStatus::Overflow,
        rusb::Error::Interrupted => TransferStatus::Cancelled,
        _ => TransferStatus::Io,
    }
}
