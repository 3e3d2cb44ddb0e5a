//! Inbound path
//!
//! One inbound buffer per device, refilled by at most one outstanding
//! request. Callers drain it front to back; a read that finds it empty
//! submits a refill and waits for the completion.

use crate::device::{DeviceHandle, Status};
use crate::error::{DriverError, Result};
use crate::sync::Interrupt;
use std::sync::{Arc, MutexGuard};
use tracing::{debug, trace, warn};
use transport::{Rejected, TransferRequest};

enum ReadStep {
    /// Bytes copied to the caller
    Delivered(usize),
    /// A request is outstanding; wait for its completion
    Pending,
}

impl DeviceHandle {
    /// Read up to `count` bytes into `dest`
    pub(crate) fn read(
        self: &Arc<Self>,
        dest: &mut [u8],
        count: usize,
        nonblocking: bool,
        interrupt: &Interrupt,
    ) -> Result<usize> {
        // Nothing can be read; report end of file
        if count == 0 || self.bulk_in_size == 0 {
            return Ok(0);
        }

        loop {
            let io = self.io.lock_interruptible(interrupt)?;
            self.ensure_attached()?;

            match self.read_step(dest, count, nonblocking)? {
                ReadStep::Delivered(n) => return Ok(n),
                ReadStep::Pending => {}
            }

            // Completions never need the I/O mutex, but other callers do
            drop(io);
            self.wait_for_read(interrupt)?;
        }
    }

    fn read_step(self: &Arc<Self>, dest: &mut [u8], count: usize, nonblocking: bool) -> Result<ReadStep> {
        loop {
            let mut status = self.status.lock();

            if status.ongoing_read {
                if nonblocking {
                    return Err(DriverError::WouldBlock);
                }
                return Ok(ReadStep::Pending);
            }

            if let Some(err) = status.take_error() {
                return Err(err);
            }

            let available = status.filled - status.consumed;
            if available == 0 {
                self.submit_read(status, count)?;
                // The completion may already have arrived
                continue;
            }

            let chunk = available.min(count);
            let Some(target) = dest.get_mut(..chunk) else {
                return Err(DriverError::Fault);
            };
            let start = status.consumed;
            target.copy_from_slice(&status.buffer[start..start + chunk]);
            status.consumed += chunk;
            trace!(
                "Delivered {} bytes, {} of {} consumed",
                chunk, status.consumed, status.filled
            );

            if available < count {
                // Read-ahead; the caller already has data
                if let Err(err) = self.submit_read(status, count - chunk) {
                    debug!("Read-ahead not submitted: {}", err);
                }
            }
            return Ok(ReadStep::Delivered(chunk));
        }
    }

    /// Lend the inbound buffer to a new request of up to `count` bytes
    ///
    /// Consumes the status guard; the lock is released before the transport
    /// sees the request.
    fn submit_read(self: &Arc<Self>, mut status: MutexGuard<'_, Status>, count: usize) -> Result<()> {
        let len = self.bulk_in_size.min(count);
        let mut buffer = std::mem::take(&mut status.buffer);
        buffer.resize(len, 0);

        let id = self.next_request_id();
        status.filled = 0;
        status.consumed = 0;
        status.ongoing_read = true;
        status.inbound = Some(id);
        drop(status);

        let request = TransferRequest::inbound(id, self.bulk_in.address, buffer, self.completion_handler());
        match self.submit_inbound(request) {
            Ok(()) => Ok(()),
            Err(Rejected { error, request }) => {
                warn!(
                    "Device {}: failed submitting read {}: {}",
                    self.device_id(),
                    id,
                    error
                );
                let buffer = request.into_buffer().into_inbound().unwrap_or_default();

                let mut status = self.status.lock();
                status.buffer = buffer;
                status.ongoing_read = false;
                status.inbound = None;
                drop(status);
                self.status.notify_all();

                Err(DriverError::from(error))
            }
        }
    }

    fn wait_for_read(&self, interrupt: &Interrupt) -> Result<()> {
        let status = self.status.lock();
        let _status = self
            .status
            .wait_until(status, interrupt, |status| !status.ongoing_read || status.disconnected)?;
        Ok(())
    }
}
