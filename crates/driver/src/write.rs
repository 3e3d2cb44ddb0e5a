//! Outbound path
//!
//! Each write copies at most `max_transfer` bytes into a fresh payload and
//! submits it without waiting for completion. Admission permits bound the
//! number of payloads the transport holds at once.

use crate::device::DeviceHandle;
use crate::error::{DriverError, Result};
use crate::sync::Interrupt;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;
use transport::{Rejected, TransferRequest};

impl DeviceHandle {
    /// Queue up to `count` bytes of `data`; returns the bytes accepted
    pub(crate) fn write(
        self: &Arc<Self>,
        data: &[u8],
        count: usize,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<usize> {
        if count == 0 {
            return Ok(0);
        }
        let writesize = count.min(self.max_transfer);

        let permit = if nonblocking {
            self.admission.try_acquire()?
        } else {
            self.admission.acquire(interrupt)?
        };

        // An earlier write failed; report it before accepting more
        self.take_error()?;

        let source = data.get(..writesize).ok_or(DriverError::Fault)?;
        let mut staged = Vec::new();
        staged
            .try_reserve_exact(writesize)
            .map_err(|_| DriverError::OutOfMemory)?;
        staged.extend_from_slice(source);
        let payload = Bytes::from(staged);

        let io = self.io.lock_interruptible(interrupt)?;
        self.ensure_attached()?;

        let id = self.next_request_id();
        let registration = self.in_flight.register(id);
        let request = TransferRequest::outbound(id, self.bulk_out.address, payload, self.completion_handler());

        match self.submit_outbound(request) {
            Ok(()) => {
                drop(io);
                // Completion returns both
                registration.commit();
                permit.forget();
                Ok(writesize)
            }
            Err(Rejected { error, request }) => {
                drop(io);
                warn!(
                    "Device {}: failed submitting write {}: {}",
                    self.device_id(),
                    id,
                    error
                );
                drop(request.into_buffer());
                Err(DriverError::Io)
            }
        }
    }
}
