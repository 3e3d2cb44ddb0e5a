//! Test utilities for bulkdev
//!
//! Provides an in-memory [`Transport`] and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::MockTransport;
//! use transport::Transport;
//!
//! let mock = MockTransport::with_bulk_endpoints(64, 512);
//! let (bulk_in, bulk_out) = mock.interface().find_bulk_pair().unwrap();
//! assert_eq!(bulk_in.address, 0x81);
//! assert_eq!(bulk_out.max_packet_size, 512);
//! ```

use bytes::Bytes;
use rand::Rng;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use transport::{
    DeviceId, Direction, EndpointDescriptor, EndpointKind, InterfaceDescriptor, Rejected,
    RequestId, SubmitError, TransferRequest, TransferStatus, Transport,
};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor/product the mock reports unless told otherwise
pub const MOCK_DEVICE_ID: DeviceId = DeviceId {
    vendor_id: 0x078b,
    product_id: 0x0010,
};

#[derive(Default)]
struct MockState {
    /// Accepted requests not yet completed, in submission order
    pending: Vec<TransferRequest>,
    /// Requested length of every accepted inbound request
    inbound_lengths: Vec<usize>,
    /// Payload of every accepted outbound request
    written: Vec<Bytes>,
    cancelled: Vec<RequestId>,
    fail_next: Option<SubmitError>,
    auto_complete_writes: bool,
    outstanding_writes: usize,
    max_outstanding_writes: usize,
}

struct MockInner {
    device_id: DeviceId,
    interface: InterfaceDescriptor,
    state: Mutex<MockState>,
    submitted: Condvar,
}

/// In-memory bulk transport
///
/// Requests stay pending until the test completes them, except outbound
/// requests in auto-complete mode, which succeed inside `submit`. Clones
/// share state, so a test keeps one clone and hands another to the driver.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new(interface: InterfaceDescriptor) -> Self {
        Self::with_device_id(MOCK_DEVICE_ID, interface)
    }

    pub fn with_device_id(device_id: DeviceId, interface: InterfaceDescriptor) -> Self {
        Self {
            inner: Arc::new(MockInner {
                device_id,
                interface,
                state: Mutex::new(MockState::default()),
                submitted: Condvar::new(),
            }),
        }
    }

    /// Interface 0 with bulk-in 0x81 and bulk-out 0x02
    pub fn with_bulk_endpoints(in_packet_size: u16, out_packet_size: u16) -> Self {
        Self::new(InterfaceDescriptor {
            number: 0,
            alt_setting: 0,
            endpoints: vec![
                EndpointDescriptor::new(0x81, EndpointKind::Bulk, in_packet_size),
                EndpointDescriptor::new(0x02, EndpointKind::Bulk, out_packet_size),
            ],
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete outbound requests successfully as soon as they are submitted
    pub fn set_auto_complete_writes(&self, enabled: bool) {
        self.state().auto_complete_writes = enabled;
    }

    /// Refuse the next submission with `error`
    pub fn fail_next_submit(&self, error: SubmitError) {
        self.state().fail_next = Some(error);
    }

    fn take_pending(&self, direction: Direction) -> Option<TransferRequest> {
        let mut state = self.state();
        let index = state
            .pending
            .iter()
            .position(|request| request.direction() == direction)?;
        let request = state.pending.remove(index);
        if direction == Direction::Out {
            state.outstanding_writes -= 1;
        }
        Some(request)
    }

    /// Complete the pending inbound request with `data`
    ///
    /// Data beyond the request's length is dropped. Returns false if no
    /// inbound request was pending.
    pub fn complete_inbound(&self, data: &[u8]) -> bool {
        let Some(mut request) = self.take_pending(Direction::In) else {
            return false;
        };
        let mut copied = 0;
        if let Some(buffer) = request.inbound_buffer_mut() {
            copied = data.len().min(buffer.len());
            buffer[..copied].copy_from_slice(&data[..copied]);
        }
        request.complete(TransferStatus::Completed, copied);
        true
    }

    /// Fail the pending inbound request with `status`
    pub fn fail_inbound(&self, status: TransferStatus) -> bool {
        match self.take_pending(Direction::In) {
            Some(request) => {
                request.complete(status, 0);
                true
            }
            None => false,
        }
    }

    /// Complete the oldest pending outbound request with `status`
    pub fn complete_outbound(&self, status: TransferStatus) -> bool {
        match self.take_pending(Direction::Out) {
            Some(request) => {
                let length = if status.is_success() { request.len() } else { 0 };
                request.complete(status, length);
                true
            }
            None => false,
        }
    }

    /// Complete every pending outbound request; returns how many there were
    pub fn complete_all_outbound(&self, status: TransferStatus) -> usize {
        let mut count = 0;
        while self.complete_outbound(status) {
            count += 1;
        }
        count
    }

    /// Payloads of all accepted outbound requests, in submission order
    pub fn written(&self) -> Vec<Bytes> {
        self.state().written.clone()
    }

    /// Requested lengths of all accepted inbound requests
    pub fn inbound_submissions(&self) -> Vec<usize> {
        self.state().inbound_lengths.clone()
    }

    /// Ids passed to `cancel`, known or not
    pub fn cancelled(&self) -> Vec<RequestId> {
        self.state().cancelled.clone()
    }

    pub fn pending_inbound(&self) -> usize {
        self.pending_count(Direction::In)
    }

    pub fn pending_outbound(&self) -> usize {
        self.pending_count(Direction::Out)
    }

    fn pending_count(&self, direction: Direction) -> usize {
        self.state()
            .pending
            .iter()
            .filter(|request| request.direction() == direction)
            .count()
    }

    /// Highest number of outbound requests ever pending at once
    pub fn max_outstanding_writes(&self) -> usize {
        self.state().max_outstanding_writes
    }

    /// Wait until an inbound request is pending
    pub fn wait_for_inbound(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |mock| mock.pending_inbound() > 0)
    }

    /// Wait until at least `count` outbound requests are pending
    pub fn wait_for_outbound(&self, count: usize, timeout: Duration) -> bool {
        self.wait_for(timeout, |mock| mock.pending_outbound() >= count)
    }

    fn wait_for(&self, timeout: Duration, ready: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if ready(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let state = self.state();
            let wait = (deadline - now).min(Duration::from_millis(10));
            let _ = self.inner.submitted.wait_timeout(state, wait);
        }
    }

    /// Whether every clone handed to a driver has been dropped
    pub fn is_released(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }
}

impl Transport for MockTransport {
    fn device_id(&self) -> DeviceId {
        self.inner.device_id
    }

    fn interface(&self) -> InterfaceDescriptor {
        self.inner.interface.clone()
    }

    fn submit(&self, request: TransferRequest) -> Result<(), Rejected> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(Rejected::new(error, request));
        }

        match request.direction() {
            Direction::In => {
                state.inbound_lengths.push(request.len());
            }
            Direction::Out => {
                if let Some(payload) = request.payload() {
                    state.written.push(payload.clone());
                }
                if state.auto_complete_writes {
                    drop(state);
                    let length = request.len();
                    request.complete(TransferStatus::Completed, length);
                    self.inner.submitted.notify_all();
                    return Ok(());
                }
                state.outstanding_writes += 1;
                state.max_outstanding_writes =
                    state.max_outstanding_writes.max(state.outstanding_writes);
            }
        }

        state.pending.push(request);
        drop(state);
        self.inner.submitted.notify_all();
        Ok(())
    }

    fn cancel(&self, id: RequestId) {
        let mut state = self.state();
        state.cancelled.push(id);
        let Some(index) = state.pending.iter().position(|request| request.id() == id) else {
            return;
        };
        let request = state.pending.remove(index);
        if request.direction() == Direction::Out {
            state.outstanding_writes -= 1;
        }
        drop(state);

        request.complete(TransferStatus::Cancelled, 0);
    }
}

/// Run `f` on a helper thread, failing the test if it outlives `timeout`
///
/// Blocking driver calls that regress into a hang fail loudly instead of
/// stalling the whole suite.
pub fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout)
        .map_err(|_| TimeoutError { duration: timeout })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Random payload of `size` bytes
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::rng().fill(&mut data[..]);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transport::{Completion, CompletionHandler};

    #[derive(Default)]
    struct Recorder {
        completions: Mutex<Vec<(RequestId, TransferStatus, usize)>>,
        count: AtomicUsize,
    }

    impl CompletionHandler for Recorder {
        fn complete(&self, completion: Completion) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.completions.lock().unwrap().push((
                completion.id,
                completion.status,
                completion.actual_length,
            ));
        }
    }

    #[test]
    fn test_inbound_completion_truncates() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let recorder = Arc::new(Recorder::default());
        let request = TransferRequest::inbound(RequestId(1), 0x81, vec![0; 4], recorder.clone());

        mock.submit(request).unwrap();
        assert_eq!(mock.pending_inbound(), 1);
        assert!(mock.complete_inbound(b"abcdef"));

        let completions = recorder.completions.lock().unwrap();
        assert_eq!(completions[0], (RequestId(1), TransferStatus::Completed, 4));
    }

    #[test]
    fn test_cancel_completes_once() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let recorder = Arc::new(Recorder::default());
        let request =
            TransferRequest::outbound(RequestId(7), 0x02, Bytes::from_static(b"x"), recorder.clone());

        mock.submit(request).unwrap();
        mock.cancel(RequestId(7));
        mock.cancel(RequestId(7));

        assert_eq!(recorder.count.load(Ordering::SeqCst), 1);
        assert_eq!(mock.cancelled(), vec![RequestId(7), RequestId(7)]);
        assert_eq!(mock.pending_outbound(), 0);
    }

    #[test]
    fn test_fail_next_submit_returns_request() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let recorder = Arc::new(Recorder::default());
        mock.fail_next_submit(SubmitError::NoMemory);

        let request =
            TransferRequest::outbound(RequestId(2), 0x02, Bytes::from_static(b"x"), recorder.clone());
        let rejected = mock.submit(request).unwrap_err();
        assert_eq!(rejected.error, SubmitError::NoMemory);
        drop(rejected.request.into_buffer());

        assert_eq!(recorder.count.load(Ordering::SeqCst), 0);
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_auto_complete_writes() {
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        mock.set_auto_complete_writes(true);
        let recorder = Arc::new(Recorder::default());

        for id in 0..3 {
            let request = TransferRequest::outbound(
                RequestId(id),
                0x02,
                Bytes::from_static(b"abc"),
                recorder.clone(),
            );
            mock.submit(request).unwrap();
        }

        assert_eq!(recorder.count.load(Ordering::SeqCst), 3);
        assert_eq!(mock.written().len(), 3);
        assert_eq!(mock.max_outstanding_writes(), 0);
    }

    #[test]
    fn test_run_with_timeout() {
        assert_eq!(run_with_timeout(DEFAULT_TEST_TIMEOUT, || 42).unwrap(), 42);

        let slow = run_with_timeout(Duration::from_millis(10), || {
            thread::sleep(Duration::from_millis(500));
        });
        assert!(slow.is_err());
    }

    #[test]
    fn test_create_mock_bulk_data() {
        let data = create_mock_bulk_data(1024);

        assert_eq!(data.len(), 1024);
        assert_eq!(data[0], 0);
        assert_eq!(data[255], 255);
        assert_eq!(data[256], 0); // Wraps around
    }

    #[test]
    fn test_random_payload_length() {
        assert_eq!(random_payload(100).len(), 100);
    }
}
