//! Submission error types

use crate::request::TransferRequest;
use thiserror::Error;

/// Reasons a transport can refuse a request at submission time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Out of memory")]
    NoMemory,

    #[error("Device not present")]
    NoDevice,

    #[error("Endpoint queue is full")]
    Busy,

    #[error("Transport error: {0}")]
    Io(String),
}

/// A refused submission, handing the request back to its submitter
///
/// The returned request is still armed; callers normally take its buffer
/// back with [`TransferRequest::into_buffer`].
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    pub error: SubmitError,
    pub request: TransferRequest,
}

impl Rejected {
    pub fn new(error: SubmitError, request: TransferRequest) -> Self {
        Self { error, request }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SubmitError::NoMemory.to_string(), "Out of memory");
        let msg = SubmitError::Io("pipe broken".to_string()).to_string();
        assert!(msg.contains("pipe broken"));
    }
}
