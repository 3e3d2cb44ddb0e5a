//! Per-open file contexts
//!
//! A [`FileContext`] is what callers read from and write to. It keeps the
//! device alive on its own, so a file opened before detach keeps working
//! (and failing with [`DriverError::Detached`]) until it is released.

use crate::device::DeviceHandle;
use crate::error::{DriverError, Result};
use crate::sync::Interrupt;
use crate::table::HandleTable;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Options for opening a device from a [`HandleTable`]
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    nonblocking: bool,
    interrupt: Option<Interrupt>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `WouldBlock` instead of waiting
    pub fn nonblocking(&mut self, nonblocking: bool) -> &mut Self {
        self.nonblocking = nonblocking;
        self
    }

    /// Use `interrupt` to cancel this file's blocking waits
    ///
    /// Without one, each file gets its own.
    pub fn interrupt(&mut self, interrupt: Interrupt) -> &mut Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn open(&self, table: &HandleTable, minor: u32) -> Result<FileContext> {
        let device = table.lookup(minor).ok_or(DriverError::NoSuchDevice)?;
        device.power_get();
        debug!("Opened minor {} ({} open)", minor, device.power_usage());

        Ok(FileContext {
            device,
            minor,
            nonblocking: self.nonblocking,
            interrupt: self.interrupt.clone().unwrap_or_default(),
        })
    }
}

/// An open file on an attached device
pub struct FileContext {
    device: Arc<DeviceHandle>,
    minor: u32,
    nonblocking: bool,
    interrupt: Interrupt,
}

impl FileContext {
    /// Read up to `len` bytes into `buf`
    ///
    /// Returns 0 at end of file. Fails with [`DriverError::Fault`] when
    /// `buf` cannot hold the bytes that would be delivered.
    pub fn read(&self, buf: &mut [u8], len: usize) -> Result<usize> {
        self.device.read(buf, len, self.nonblocking, &self.interrupt)
    }

    /// Queue up to `len` bytes of `data` for transmission
    ///
    /// Returns once the data is submitted, not once it is sent. Accepts at
    /// most the configured `max_transfer` bytes per call.
    pub fn write(&self, data: &[u8], len: usize) -> Result<usize> {
        self.device.write(data, len, self.nonblocking, &self.interrupt)
    }

    /// Wait for outstanding writes and report any error recorded since the
    /// last call
    pub fn flush(&self) -> Result<()> {
        let _io = self.device.io.lock_interruptible(&self.interrupt)?;
        self.device.draw_down();
        self.device.take_error()
    }

    /// Close the file
    pub fn release(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
    }

    /// Handle that interrupts this file's blocking waits when raised
    pub fn interrupter(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn device(&self) -> &Arc<DeviceHandle> {
        &self.device
    }
}

impl Drop for FileContext {
    fn drop(&mut self) {
        self.device.power_put();
        debug!("Released minor {}", self.minor);
    }
}

impl std::fmt::Debug for FileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContext")
            .field("minor", &self.minor)
            .field("nonblocking", &self.nonblocking)
            .field("device", &self.device)
            .finish()
    }
}

impl io::Read for FileContext {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        FileContext::read(self, buf, len).map_err(io::Error::from)
    }
}

impl io::Write for FileContext {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileContext::write(self, buf, buf.len()).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        FileContext::flush(self).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::lifecycle::Attachment;
    use common::test_utils::MockTransport;
    use std::io::{Read, Write};

    #[test]
    fn test_open_unknown_minor() {
        let table = HandleTable::new(&DriverConfig::default());
        assert!(matches!(table.open(66), Err(DriverError::NoSuchDevice)));
    }

    #[test]
    fn test_open_tracks_power_usage() {
        let config = DriverConfig::default();
        let table = HandleTable::new(&config);
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        let attachment = Attachment::attach(Box::new(mock), &table, &config).unwrap();

        let first = table.open(attachment.minor()).unwrap();
        let second = table.open(attachment.minor()).unwrap();
        assert_eq!(attachment.power_usage(), 2);
        assert!(!attachment.is_idle());

        first.release().unwrap();
        drop(second);
        assert!(attachment.is_idle());
    }

    #[test]
    fn test_std_io_traits() {
        let config = DriverConfig::default();
        let table = HandleTable::new(&config);
        let mock = MockTransport::with_bulk_endpoints(64, 64);
        mock.set_auto_complete_writes(true);
        let attachment = Attachment::attach(Box::new(mock.clone()), &table, &config).unwrap();
        let mut file = table.open(attachment.minor()).unwrap();

        file.write_all(b"hello").unwrap();
        file.flush().unwrap();
        assert_eq!(mock.written(), vec![bytes::Bytes::from_static(b"hello")]);

        file.set_nonblocking(true);
        let mut buf = [0u8; 8];
        let err = Read::read(&mut file, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        mock.complete_inbound(b"abc");
        let n = Read::read(&mut file, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }
}
