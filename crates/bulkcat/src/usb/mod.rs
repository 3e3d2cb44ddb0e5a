//! libusb-backed transport
//!
//! - `device`: discovery and interface claiming
//! - `transfers`: synchronous bulk transfer execution and error mapping
//! - `worker`: per-direction lanes implementing [`transport::Transport`]

pub mod device;
pub mod transfers;
pub mod worker;

pub use device::{UsbDevice, enumerate};
pub use worker::RusbTransport;
