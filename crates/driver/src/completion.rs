//! Completion context
//!
//! Runs on whatever thread the transport delivers completions from,
//! possibly inside `submit`. Never blocks beyond short lock holds and never
//! touches the I/O mutex.

use crate::device::DeviceHandle;
use tracing::{debug, trace, warn};
use transport::{Completion, CompletionHandler, Direction, TransferStatus};

impl CompletionHandler for DeviceHandle {
    fn complete(&self, completion: Completion) {
        match completion.direction() {
            Direction::In => self.read_complete(completion),
            Direction::Out => self.write_complete(completion),
        }
    }
}

impl DeviceHandle {
    fn read_complete(&self, completion: Completion) {
        let Completion {
            id,
            status: outcome,
            actual_length,
            buffer,
            ..
        } = completion;

        let mut status = self.status.lock();
        if status.inbound != Some(id) {
            debug!("Ignoring completion of unknown read {}", id);
            return;
        }

        if let Some(buffer) = buffer.into_inbound() {
            status.buffer = buffer;
        }
        if outcome.is_success() {
            trace!("Read {} completed with {} bytes", id, actual_length);
            status.filled = actual_length.min(status.buffer.len());
        } else {
            self.record_error(&mut status.last_error, "read", outcome);
        }

        status.inbound = None;
        status.ongoing_read = false;
        drop(status);

        self.status.notify_all();
    }

    fn write_complete(&self, completion: Completion) {
        let Completion {
            id,
            status: outcome,
            actual_length,
            ..
        } = completion;

        // Each tracked write owns exactly one permit
        if !self.in_flight.contains(id) {
            debug!("Ignoring completion of unknown write {}", id);
            return;
        }

        if outcome.is_success() {
            trace!("Write {} completed with {} bytes", id, actual_length);
        } else {
            let mut status = self.status.lock();
            self.record_error(&mut status.last_error, "write", outcome);
        }

        // The payload went with `completion`; only bookkeeping remains
        self.in_flight.remove(id);
        self.admission.release();
    }

    /// Cancellations are expected during drain and detach and stay silent
    fn record_error(&self, slot: &mut Option<TransferStatus>, what: &str, outcome: TransferStatus) {
        if outcome.is_cancellation() {
            trace!("Bulk {} cancelled ({})", what, outcome);
            return;
        }
        warn!(
            "Device {}: nonzero {} bulk status received: {} ({})",
            self.device_id(),
            what,
            outcome,
            outcome.errno()
        );
        *slot = Some(outcome);
    }
}
