//! Bulk-transfer driver core
//!
//! Presents blocking and non-blocking `read`/`write` over an asynchronous
//! bulk transport whose requests complete out of order, fail, or vanish when
//! the device is unplugged.
//!
//! # Architecture
//!
//! ```text
//!  caller threads            driver core                     transport
//!  ──────────────            ───────────                     ─────────
//!  FileContext::read ──► ReadPath ──(io mutex)── submit ───►  inbound
//!  FileContext::write ─► WritePath ─(permit + io)─ submit ──► outbound
//!                                                                │
//!            waiters ◄── CompletionHandler ◄──── completion ─────┘
//!
//!  Attachment (attach / detach / suspend / reset) ── drain ── cancel
//! ```
//!
//! - [`Attachment`] owns the device for as long as the transport is bound
//!   and drives every lifecycle transition.
//! - [`HandleTable`] allocates minor numbers and hands out [`FileContext`]s;
//!   callers own it explicitly and pass it to attach and open.
//! - [`DeviceHandle`] is the shared, reference-counted device state. It is
//!   destroyed exactly once, when the last open file, the attachment and
//!   every pending completion have let go of it.
//!
//! # Example
//!
//! ```no_run
//! use driver::{Attachment, DriverConfig, HandleTable};
//! # fn transport() -> Box<dyn transport::Transport> { unimplemented!() }
//!
//! let config = DriverConfig::default();
//! let table = HandleTable::new(&config);
//! let attachment = Attachment::attach(transport(), &table, &config)?;
//!
//! let file = table.open(attachment.minor())?;
//! let accepted = file.write(b"ping", 4)?;
//! assert_eq!(accepted, 4);
//! file.flush()?;
//! file.release()?;
//!
//! attachment.detach();
//! # Ok::<(), driver::DriverError>(())
//! ```

mod anchor;
mod completion;
pub mod config;
pub mod device;
pub mod error;
pub mod file;
pub mod lifecycle;
mod read;
pub mod sync;
pub mod table;
mod write;

pub use config::DriverConfig;
pub use device::{BufferState, DeviceHandle};
pub use error::{DriverError, Result};
pub use file::{FileContext, OpenOptions};
pub use lifecycle::Attachment;
pub use sync::Interrupt;
pub use table::HandleTable;
