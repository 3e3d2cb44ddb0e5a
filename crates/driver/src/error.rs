//! Driver error taxonomy

use std::io;
use thiserror::Error;
use transport::{SubmitError, TransferStatus};

/// Errors surfaced to callers of the driver entry points
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// No device is registered under the requested handle
    #[error("No such device")]
    NoSuchDevice,

    /// The device was disconnected while the call was in progress
    #[error("Device disconnected")]
    Detached,

    /// A non-blocking call could not proceed without waiting
    #[error("Operation would block")]
    WouldBlock,

    /// The caller's interrupt token was raised while waiting
    #[error("Interrupted while waiting")]
    Interrupted,

    /// Generic transport failure
    #[error("I/O error")]
    Io,

    /// The transport reported a stall or the device was reset
    #[error("Device reset (broken pipe)")]
    DeviceReset,

    /// Caller-supplied buffer is shorter than the requested length
    #[error("Bad buffer address")]
    Fault,

    #[error("Out of memory")]
    OutOfMemory,

    /// Endpoint discovery failed at attach time
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The handle table has no free minor numbers left
    #[error("No free minor number")]
    NoFreeMinor,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Map a recorded completion status to the error reported to callers
    ///
    /// Pipe-class statuses stay distinguishable so callers can retry after
    /// a reset; everything else collapses into [`DriverError::Io`].
    pub fn from_status(status: TransferStatus) -> Self {
        if status.is_reset_class() {
            DriverError::DeviceReset
        } else {
            DriverError::Io
        }
    }

    /// Conventional negative errno for this error
    pub fn errno(&self) -> i32 {
        match self {
            DriverError::NoSuchDevice | DriverError::Detached => -19, // ENODEV
            DriverError::WouldBlock => -11,                           // EAGAIN
            DriverError::Interrupted => -512,                         // ERESTARTSYS
            DriverError::Io => -5,                                    // EIO
            DriverError::DeviceReset => -32,                          // EPIPE
            DriverError::Fault => -14,                                // EFAULT
            DriverError::OutOfMemory => -12,                          // ENOMEM
            DriverError::UnsupportedDevice(_) => -19,
            DriverError::NoFreeMinor => -54, // EXFULL
            DriverError::Config(_) => -22,   // EINVAL
        }
    }
}

impl From<SubmitError> for DriverError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::NoMemory => DriverError::OutOfMemory,
            SubmitError::NoDevice | SubmitError::Busy | SubmitError::Io(_) => DriverError::Io,
        }
    }
}

impl From<DriverError> for io::Error {
    fn from(err: DriverError) -> Self {
        let kind = match err {
            DriverError::WouldBlock => io::ErrorKind::WouldBlock,
            DriverError::Interrupted => io::ErrorKind::Interrupted,
            DriverError::NoSuchDevice | DriverError::Detached => io::ErrorKind::NotFound,
            DriverError::DeviceReset => io::ErrorKind::BrokenPipe,
            DriverError::OutOfMemory => io::ErrorKind::OutOfMemory,
            DriverError::Fault | DriverError::Config(_) => io::ErrorKind::InvalidInput,
            DriverError::UnsupportedDevice(_) => io::ErrorKind::Unsupported,
            DriverError::Io | DriverError::NoFreeMinor => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(
            DriverError::from_status(TransferStatus::Stall),
            DriverError::DeviceReset
        );
        assert_eq!(DriverError::from_status(TransferStatus::Io), DriverError::Io);
        assert_eq!(
            DriverError::from_status(TransferStatus::Overflow),
            DriverError::Io
        );
    }

    #[test]
    fn test_submit_error_mapping() {
        assert_eq!(
            DriverError::from(SubmitError::NoMemory),
            DriverError::OutOfMemory
        );
        assert_eq!(DriverError::from(SubmitError::Busy), DriverError::Io);
    }

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = DriverError::WouldBlock.into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let err: io::Error = DriverError::Interrupted.into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);

        let err: io::Error = DriverError::DeviceReset.into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_errno() {
        assert_eq!(DriverError::WouldBlock.errno(), -11);
        assert_eq!(DriverError::DeviceReset.errno(), -32);
        assert_eq!(DriverError::Detached.errno(), -19);
    }
}
