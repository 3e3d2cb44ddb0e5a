//! Transport-facing types for bulkdev
//!
//! This crate defines the contract between the bulk-transfer driver core and
//! whatever actually moves bytes on the wire (libusb, a simulator, a test
//! double). The core only ever sees:
//!
//! - [`Transport`]: submit a [`TransferRequest`], cancel one by [`RequestId`]
//! - [`CompletionHandler`]: the callback a transport invokes when a request
//!   finishes, successfully or not
//! - descriptor types used at attach time to find the bulk endpoint pair
//!
//! # Example
//!
//! ```
//! use transport::{EndpointDescriptor, EndpointKind, InterfaceDescriptor};
//!
//! let interface = InterfaceDescriptor {
//!     number: 0,
//!     alt_setting: 0,
//!     endpoints: vec![
//!         EndpointDescriptor::new(0x81, EndpointKind::Bulk, 64),
//!         EndpointDescriptor::new(0x02, EndpointKind::Bulk, 64),
//!     ],
//! };
//!
//! let (bulk_in, bulk_out) = interface.find_bulk_pair().unwrap();
//! assert_eq!(bulk_in.address, 0x81);
//! assert_eq!(bulk_out.address, 0x02);
//! ```

pub mod backend;
pub mod error;
pub mod request;
pub mod types;

pub use backend::Transport;
pub use error::{Rejected, SubmitError};
pub use request::{Completion, CompletionHandler, TransferBuffer, TransferRequest};
pub use types::{
    DeviceId, Direction, EndpointDescriptor, EndpointKind, InterfaceDescriptor, RequestId,
    TransferStatus,
};
