//! Transfer requests and the completion contract
//!
//! A [`TransferRequest`] owns its data buffer and a reference to the
//! [`CompletionHandler`] that must hear about it. Once submitted, the
//! transport is responsible for calling [`TransferRequest::complete`] exactly
//! once. A request that is dropped while still armed completes itself with
//! [`TransferStatus::Shutdown`], so a backend that loses a request can never
//! strand the resources the submitter tied to it.

use crate::types::{Direction, RequestId, TransferStatus};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Receives transfer completions
///
/// Called from the transport's completion context, which may be any thread.
/// Implementations must not block.
pub trait CompletionHandler: Send + Sync {
    fn complete(&self, completion: Completion);
}

/// Data carried by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferBuffer {
    /// Receive buffer; its length is the number of bytes requested
    In(Vec<u8>),
    /// Payload to send
    Out(Bytes),
}

impl TransferBuffer {
    pub fn len(&self) -> usize {
        match self {
            TransferBuffer::In(buf) => buf.len(),
            TransferBuffer::Out(payload) => payload.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive buffer, if this is an inbound buffer
    pub fn into_inbound(self) -> Option<Vec<u8>> {
        match self {
            TransferBuffer::In(buf) => Some(buf),
            TransferBuffer::Out(_) => None,
        }
    }
}

/// A single asynchronous unit of data movement
pub struct TransferRequest {
    id: RequestId,
    endpoint: u8,
    buffer: TransferBuffer,
    /// `None` once completed or disarmed
    handler: Option<Arc<dyn CompletionHandler>>,
}

impl TransferRequest {
    /// Inbound request; the transport fills up to `buffer.len()` bytes
    pub fn inbound(
        id: RequestId,
        endpoint: u8,
        buffer: Vec<u8>,
        handler: Arc<dyn CompletionHandler>,
    ) -> Self {
        Self {
            id,
            endpoint,
            buffer: TransferBuffer::In(buffer),
            handler: Some(handler),
        }
    }

    /// Outbound request carrying `payload`
    pub fn outbound(
        id: RequestId,
        endpoint: u8,
        payload: Bytes,
        handler: Arc<dyn CompletionHandler>,
    ) -> Self {
        Self {
            id,
            endpoint,
            buffer: TransferBuffer::Out(payload),
            handler: Some(handler),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn direction(&self) -> Direction {
        match self.buffer {
            TransferBuffer::In(_) => Direction::In,
            TransferBuffer::Out(_) => Direction::Out,
        }
    }

    /// Requested transfer length in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Payload of an outbound request
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.buffer {
            TransferBuffer::Out(payload) => Some(payload),
            TransferBuffer::In(_) => None,
        }
    }

    /// Receive buffer of an inbound request
    pub fn inbound_buffer_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.buffer {
            TransferBuffer::In(buf) => Some(buf.as_mut_slice()),
            TransferBuffer::Out(_) => None,
        }
    }

    /// Finish the request and notify its handler
    ///
    /// `actual_length` is clamped to the requested length.
    pub fn complete(mut self, status: TransferStatus, actual_length: usize) {
        self.deliver(status, actual_length);
    }

    /// Take the buffer back without notifying anyone
    ///
    /// Used by submitters when the transport refused the request.
    pub fn into_buffer(mut self) -> TransferBuffer {
        self.handler = None;
        std::mem::replace(&mut self.buffer, TransferBuffer::Out(Bytes::new()))
    }

    fn deliver(&mut self, status: TransferStatus, actual_length: usize) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        let buffer = std::mem::replace(&mut self.buffer, TransferBuffer::Out(Bytes::new()));
        let completion = Completion {
            id: self.id,
            endpoint: self.endpoint,
            status,
            actual_length: actual_length.min(buffer.len()),
            buffer,
        };
        handler.complete(completion);
    }
}

impl Drop for TransferRequest {
    fn drop(&mut self) {
        if self.handler.is_some() {
            tracing::debug!(
                "Transfer {} on endpoint {:#04x} dropped without completion",
                self.id,
                self.endpoint
            );
            self.deliver(TransferStatus::Shutdown, 0);
        }
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("id", &self.id)
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("direction", &self.direction())
            .field("len", &self.len())
            .field("armed", &self.handler.is_some())
            .finish()
    }
}

/// Outcome of a request, handed to its [`CompletionHandler`]
#[derive(Debug)]
pub struct Completion {
    pub id: RequestId,
    pub endpoint: u8,
    pub status: TransferStatus,
    /// Bytes actually transferred
    pub actual_length: usize,
    /// The request's buffer, returned to the submitter
    pub buffer: TransferBuffer,
}

impl Completion {
    pub fn direction(&self) -> Direction {
        match self.buffer {
            TransferBuffer::In(_) => Direction::In,
            TransferBuffer::Out(_) => Direction::Out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(RequestId, TransferStatus, usize)>>,
    }

    impl CompletionHandler for Recorder {
        fn complete(&self, completion: Completion) {
            self.seen.lock().unwrap().push((
                completion.id,
                completion.status,
                completion.actual_length,
            ));
        }
    }

    #[test]
    fn test_complete_notifies_once() {
        let recorder = Arc::new(Recorder::default());
        let mut request = TransferRequest::inbound(RequestId(1), 0x81, vec![0; 64], recorder.clone());

        request.inbound_buffer_mut().unwrap()[..3].copy_from_slice(b"abc");
        request.complete(TransferStatus::Completed, 3);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(*seen, vec![(RequestId(1), TransferStatus::Completed, 3)]);
    }

    #[test]
    fn test_actual_length_clamped() {
        let recorder = Arc::new(Recorder::default());
        let request = TransferRequest::inbound(RequestId(2), 0x81, vec![0; 8], recorder.clone());
        request.complete(TransferStatus::Completed, 100);

        assert_eq!(recorder.seen.lock().unwrap()[0].2, 8);
    }

    #[test]
    fn test_drop_completes_with_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let request = TransferRequest::outbound(
            RequestId(3),
            0x02,
            Bytes::from_static(b"hello"),
            recorder.clone(),
        );
        drop(request);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(*seen, vec![(RequestId(3), TransferStatus::Shutdown, 0)]);
    }

    #[test]
    fn test_into_buffer_disarms() {
        let recorder = Arc::new(Recorder::default());
        let request = TransferRequest::outbound(
            RequestId(4),
            0x02,
            Bytes::from_static(b"payload"),
            recorder.clone(),
        );
        assert_eq!(request.direction(), Direction::Out);

        let buffer = request.into_buffer();
        assert_eq!(buffer, TransferBuffer::Out(Bytes::from_static(b"payload")));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
