//! Descriptor and status types shared by transports and the driver core

use std::fmt;

/// Identifier for a single submitted transfer request
///
/// Assigned by the submitter; unique per device for the device's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// USB vendor/product pair reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Data direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Endpoint transfer type (bmAttributes bits 0..1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of the active interface setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress, direction in bit 7
    pub address: u8,
    /// Transfer type
    pub kind: EndpointKind,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn new(address: u8, kind: EndpointKind, max_packet_size: u16) -> Self {
        Self {
            address,
            kind,
            max_packet_size,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::from_address(self.address)
    }

    pub fn is_bulk_in(&self) -> bool {
        self.kind == EndpointKind::Bulk && self.direction() == Direction::In
    }

    pub fn is_bulk_out(&self) -> bool {
        self.kind == EndpointKind::Bulk && self.direction() == Direction::Out
    }
}

/// Active setting of the interface a transport is bound to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// bAlternateSetting
    pub alt_setting: u8,
    /// Endpoints in descriptor order
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    /// First bulk-in and first bulk-out endpoint, in descriptor order
    ///
    /// Returns `None` unless both exist.
    pub fn find_bulk_pair(&self) -> Option<(EndpointDescriptor, EndpointDescriptor)> {
        let bulk_in = self.endpoints.iter().find(|ep| ep.is_bulk_in())?;
        let bulk_out = self.endpoints.iter().find(|ep| ep.is_bulk_out())?;
        Some((*bulk_in, *bulk_out))
    }
}

/// Final status of a transfer request, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer finished; `actual_length` bytes moved
    Completed,
    /// Request was unlinked by the submitter (ENOENT)
    Cancelled,
    /// Endpoint or host controller shut down, usually unplug (ESHUTDOWN)
    Shutdown,
    /// Request was unlinked asynchronously during teardown (ECONNRESET)
    ConnectionReset,
    /// Endpoint stalled or the device was reset (EPIPE)
    Stall,
    /// Transfer timed out on the wire
    Timeout,
    /// Device sent more data than requested
    Overflow,
    /// Any other transport failure
    Io,
}

impl TransferStatus {
    pub fn is_success(self) -> bool {
        self == TransferStatus::Completed
    }

    /// Statuses produced by teardown rather than a transport fault
    pub fn is_cancellation(self) -> bool {
        matches!(
            self,
            TransferStatus::Cancelled | TransferStatus::Shutdown | TransferStatus::ConnectionReset
        )
    }

    /// Pipe-class statuses that callers see as a device reset
    pub fn is_reset_class(self) -> bool {
        self == TransferStatus::Stall
    }

    /// Conventional negative errno for the status (0 for success)
    pub fn errno(self) -> i32 {
        match self {
            TransferStatus::Completed => 0,
            TransferStatus::Cancelled => -2,
            TransferStatus::Shutdown => -108,
            TransferStatus::ConnectionReset => -104,
            TransferStatus::Stall => -32,
            TransferStatus::Timeout => -110,
            TransferStatus::Overflow => -75,
            TransferStatus::Io => -5,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Shutdown => "shutdown",
            TransferStatus::ConnectionReset => "connection reset",
            TransferStatus::Stall => "stall",
            TransferStatus::Timeout => "timeout",
            TransferStatus::Overflow => "overflow",
            TransferStatus::Io => "i/o error",
        };
        write!(f, "{} ({})", name, self.errno())
    }
}
