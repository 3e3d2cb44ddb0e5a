//! Threaded rusb transport
//!
//! Each direction gets a dedicated worker thread ("lane") fed by a bounded
//! async-channel queue, so `submit` never blocks the caller. Lanes run one
//! request at a time with rusb's synchronous API and deliver the completion
//! from their own thread.

use crate::usb::device::UsbDevice;
use crate::usb::transfers::{execute_inbound, execute_outbound};
use async_channel::{Receiver, Sender};
use rusb::{Context, DeviceHandle};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use transport::{
    DeviceId, Direction, InterfaceDescriptor, Rejected, RequestId, SubmitError, TransferRequest,
    TransferStatus, Transport,
};

/// Requests a lane may hold queued at once
const LANE_DEPTH: usize = 32;

#[derive(Default)]
struct TrackerState {
    live: HashSet<RequestId>,
    cancelled: HashSet<RequestId>,
}

/// Queued and cancelled request ids shared between the transport and its lanes
#[derive(Default)]
struct RequestTracker {
    state: Mutex<TrackerState>,
}

impl RequestTracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, id: RequestId) {
        self.lock().live.insert(id);
    }

    /// Mark a live request cancelled; unknown ids are ignored
    fn cancel(&self, id: RequestId) -> bool {
        let mut state = self.lock();
        state.live.contains(&id) && state.cancelled.insert(id)
    }

    fn is_cancelled(&self, id: RequestId) -> bool {
        self.lock().cancelled.contains(&id)
    }

    /// Forget `id`; returns whether it had been cancelled
    fn finish(&self, id: RequestId) -> bool {
        let mut state = self.lock();
        state.live.remove(&id);
        state.cancelled.remove(&id)
    }
}

/// A [`Transport`] over one claimed interface of a libusb device
pub struct RusbTransport {
    device_id: DeviceId,
    interface: InterfaceDescriptor,
    handle: Arc<DeviceHandle<Context>>,
    inbound: Sender<TransferRequest>,
    outbound: Sender<TransferRequest>,
    tracker: Arc<RequestTracker>,
}

impl RusbTransport {
    /// Claim `interface` on `device` and start both lanes
    ///
    /// Outbound transfers give up after `timeout` (zero waits forever).
    pub fn open(
        device: &UsbDevice,
        interface: InterfaceDescriptor,
        timeout: Duration,
    ) -> common::Result<Self> {
        let device_id = device.id();
        let handle = Arc::new(device.open(interface.number)?);
        let tracker = Arc::new(RequestTracker::default());

        let (inbound, inbound_rx) = async_channel::bounded(LANE_DEPTH);
        let (outbound, outbound_rx) = async_channel::bounded(LANE_DEPTH);

        spawn_lane(
            format!("bulk-in-{}", device_id),
            inbound_rx,
            Arc::clone(&handle),
            Arc::clone(&tracker),
            timeout,
        )?;
        spawn_lane(
            format!("bulk-out-{}", device_id),
            outbound_rx,
            Arc::clone(&handle),
            Arc::clone(&tracker),
            timeout,
        )?;

        info!(
            "Opened {} interface {} (bus {:03} device {:03})",
            device_id,
            interface.number,
            device.bus_number(),
            device.device_address()
        );

        Ok(Self {
            device_id,
            interface,
            handle,
            inbound,
            outbound,
            tracker,
        })
    }
}

impl Transport for RusbTransport {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn interface(&self) -> InterfaceDescriptor {
        self.interface.clone()
    }

    fn submit(&self, request: TransferRequest) -> Result<(), Rejected> {
        let id = request.id();
        let lane = match request.direction() {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        };

        self.tracker.track(id);
        lane.try_send(request).map_err(|err| {
            self.tracker.finish(id);
            let error = if err.is_full() {
                SubmitError::Busy
            } else {
                SubmitError::NoDevice
            };
            Rejected::new(error, err.into_inner())
        })
    }

    fn cancel(&self, id: RequestId) {
        if self.tracker.cancel(id) {
            debug!("Cancellation requested for {}", id);
        }
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        // Lanes exit once their queues close; they may be the ones dropping us
        self.inbound.close();
        self.outbound.close();

        let number = self.interface.number;
        if let Err(e) = self.handle.release_interface(number) {
            warn!("Failed to release interface {}: {}", number, e);
        }
        if let Err(e) = self.handle.attach_kernel_driver(number) {
            debug!(
                "Could not reattach kernel driver to interface {}: {}",
                number, e
            );
        }
        info!("Released {} interface {}", self.device_id, number);
    }
}

fn spawn_lane(
    name: String,
    queue: Receiver<TransferRequest>,
    handle: Arc<DeviceHandle<Context>>,
    tracker: Arc<RequestTracker>,
    timeout: Duration,
) -> std::io::Result<()> {
    thread::Builder::new().name(name.clone()).spawn(move || {
        debug!("{} started", name);
        while let Ok(mut request) = queue.recv_blocking() {
            let id = request.id();
            let (status, length) = if tracker.is_cancelled(id) {
                (TransferStatus::Cancelled, 0)
            } else {
                match request.direction() {
                    Direction::In => {
                        execute_inbound(&handle, &mut request, || tracker.is_cancelled(id))
                    }
                    Direction::Out => execute_outbound(&handle, &request, timeout),
                }
            };
            tracker.finish(id);
            request.complete(status, length);
        }
        debug!("{} stopped", name);
    })?;
    Ok(())
}
