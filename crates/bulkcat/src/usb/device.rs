//! USB device discovery
//!
//! Wraps a `rusb::Device` with its cached descriptor and converts the
//! active configuration into the transport's interface description.

use common::{Error, Result};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, TransferType, UsbContext};
use tracing::{debug, warn};
use transport::{DeviceId, EndpointDescriptor, EndpointKind, InterfaceDescriptor};

/// USB device wrapper with cached information
pub struct UsbDevice {
    device: Device<Context>,
    descriptor: DeviceDescriptor,
}

impl UsbDevice {
    /// Reads and caches the device descriptor
    pub fn new(device: Device<Context>) -> std::result::Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        Ok(Self { device, descriptor })
    }

    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.descriptor.vendor_id(), self.descriptor.product_id())
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn device_address(&self) -> u8 {
        self.device.address()
    }

    /// Manufacturer and product strings, if the device can be opened
    pub fn strings(&self) -> (Option<String>, Option<String>) {
        let Ok(handle) = self.device.open() else {
            return (None, None);
        };
        (
            handle.read_manufacturer_string_ascii(&self.descriptor).ok(),
            handle.read_product_string_ascii(&self.descriptor).ok(),
        )
    }

    /// First interface of the active configuration with a bulk-in and a
    /// bulk-out endpoint
    ///
    /// Only alternate setting 0 of each interface is considered.
    pub fn bulk_interface(&self) -> Option<InterfaceDescriptor> {
        let config = match self.device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                debug!("No active configuration on {}: {}", self.id(), e);
                return None;
            }
        };

        config
            .interfaces()
            .filter_map(|interface| interface.descriptors().next())
            .map(|setting| InterfaceDescriptor {
                number: setting.interface_number(),
                alt_setting: setting.setting_number(),
                endpoints: setting
                    .endpoint_descriptors()
                    .map(|endpoint| {
                        EndpointDescriptor::new(
                            endpoint.address(),
                            map_transfer_type(endpoint.transfer_type()),
                            endpoint.max_packet_size(),
                        )
                    })
                    .collect(),
            })
            .find(|interface| interface.find_bulk_pair().is_some())
    }

    /// Open the device and claim `interface`
    ///
    /// Detaches a kernel driver bound to the interface first.
    pub fn open(&self, interface: u8) -> Result<DeviceHandle<Context>> {
        let handle = self.device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", self.id(), e);
            Error::Usb(format!("Failed to open {}: {}", self.id(), e))
        })?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }

        handle.claim_interface(interface).map_err(|e| {
            Error::Usb(format!("Failed to claim interface {}: {}", interface, e))
        })?;
        debug!("Claimed interface {} on {}", interface, self.id());

        Ok(handle)
    }
}

fn map_transfer_type(transfer_type: TransferType) -> EndpointKind {
    match transfer_type {
        TransferType::Control => EndpointKind::Control,
        TransferType::Isochronous => EndpointKind::Isochronous,
        TransferType::Bulk => EndpointKind::Bulk,
        TransferType::Interrupt => EndpointKind::Interrupt,
    }
}

/// Devices admitted by `allows` that expose a bulk endpoint pair
pub fn enumerate(
    context: &Context,
    allows: impl Fn(DeviceId) -> bool,
) -> Result<Vec<(UsbDevice, InterfaceDescriptor)>> {
    let devices = context
        .devices()
        .map_err(|e| Error::Usb(format!("Failed to list devices: {}", e)))?;

    let mut found = Vec::new();
    for device in devices.iter() {
        let device = match UsbDevice::new(device) {
            Ok(device) => device,
            Err(e) => {
                debug!("Skipping device without descriptor: {}", e);
                continue;
            }
        };
        if !allows(device.id()) {
            continue;
        }
        if let Some(interface) = device.bulk_interface() {
            found.push((device, interface));
        }
    }
    Ok(found)
}
