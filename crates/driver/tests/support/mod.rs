//! Shared fixtures for driver integration tests

#![allow(dead_code)]

use common::test_utils::MockTransport;
use driver::{Attachment, DriverConfig, FileContext, HandleTable, OpenOptions};

/// Attach a fresh mock with the given bulk packet sizes
pub fn attach_mock(in_size: u16, out_size: u16) -> (MockTransport, HandleTable, Attachment) {
    let mock = MockTransport::with_bulk_endpoints(in_size, out_size);
    let (table, attachment) = attach_with(&mock, DriverConfig::default());
    (mock, table, attachment)
}

pub fn attach_with(mock: &MockTransport, config: DriverConfig) -> (HandleTable, Attachment) {
    let table = HandleTable::new(&config);
    let attachment = Attachment::attach(Box::new(mock.clone()), &table, &config)
        .expect("attach mock transport");
    (table, attachment)
}

pub fn open(table: &HandleTable, attachment: &Attachment, nonblocking: bool) -> FileContext {
    OpenOptions::new()
        .nonblocking(nonblocking)
        .open(table, attachment.minor())
        .expect("open attached device")
}
