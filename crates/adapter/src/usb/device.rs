//! libusb device and interface objects
//!
//! These are the concrete `Service`, `Plugin`, `Interface` and `Device` types
//! of [`super::LibUsbBackend`]. The pipe table of an interface is read from the
//! active configuration descriptor when the interface is queried: pipe 0 is
//! the default control pipe and pipes 1..=N are the endpoints of alternate
//! setting 0, in descriptor order.

use super::transfers::map_rusb_error;
use common::{
    MatchCriteria, NativeError, PipeDirection, PipeProperties, ServiceClass, TransferKind,
};
use rusb::{Context, Device, DeviceHandle};
use tracing::{debug, warn};

/// A device matching some lookup, not yet opened
pub struct LibUsbService {
    pub(crate) device: Device<Context>,
    pub(crate) criteria: MatchCriteria,
}

impl LibUsbService {
    /// Check `device` against `criteria`
    ///
    /// Interface criteria only match the active configuration, since that is
    /// the only one whose interfaces exist on the bus.
    pub(crate) fn matches(device: &Device<Context>, criteria: &MatchCriteria) -> bool {
        let Ok(descriptor) = device.device_descriptor() else {
            return false;
        };
        if !criteria.matches_ids(descriptor.vendor_id(), descriptor.product_id()) {
            return false;
        }
        if criteria.class == ServiceClass::Device {
            return true;
        }

        let config = match device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                debug!("No active configuration on {:?}: {}", device, e);
                return false;
            }
        };
        if let Some(value) = criteria.configuration_value {
            if config.number() != value {
                return false;
            }
        }
        match criteria.interface_number {
            Some(number) => config.interfaces().any(|i| i.number() == number),
            None => true,
        }
    }
}

/// Opened libusb handle waiting to be turned into a typed object
pub struct LibUsbPlugin {
    pub(crate) device: Device<Context>,
    pub(crate) criteria: MatchCriteria,
    pub(crate) class: ServiceClass,
    pub(crate) handle: Option<DeviceHandle<Context>>,
}

impl LibUsbPlugin {
    pub(crate) fn take_handle(
        &mut self,
        wanted: ServiceClass,
    ) -> Result<DeviceHandle<Context>, NativeError> {
        if self.class != wanted {
            warn!("Plugin created for {:?} queried as {:?}", self.class, wanted);
            return Err(NativeError::InvalidParam);
        }
        self.handle.take().ok_or(NativeError::NotFound)
    }
}

/// Interface of a device, with its pipe table
pub struct LibUsbInterface {
    pub(crate) handle: DeviceHandle<Context>,
    pub(crate) number: u8,
    pub(crate) pipes: Vec<PipeProperties>,
    pub(crate) control_packet_size: u16,
    pub(crate) claimed: bool,
}

impl LibUsbInterface {
    pub(crate) fn new(
        device: &Device<Context>,
        handle: DeviceHandle<Context>,
        number: u8,
    ) -> Result<Self, NativeError> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
        let config = device.active_config_descriptor().map_err(map_rusb_error)?;

        let interface = config
            .interfaces()
            .find(|i| i.number() == number)
            .ok_or(NativeError::NotFound)?;

        let pipes: Vec<PipeProperties> = interface
            .descriptors()
            .find(|d| d.setting_number() == 0)
            .map(|setting| {
                setting
                    .endpoint_descriptors()
                    .map(|endpoint| PipeProperties {
                        direction: pipe_direction(endpoint.direction()),
                        number: endpoint.number(),
                        transfer_type: transfer_kind(endpoint.transfer_type()),
                        max_packet_size: endpoint.max_packet_size(),
                        interval: endpoint.interval(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            handle,
            number,
            pipes,
            control_packet_size: u16::from(descriptor.max_packet_size()),
            claimed: false,
        })
    }

    /// Properties of `pipe`, pipe 0 being the default control pipe
    pub(crate) fn pipe(&self, pipe: u8) -> Result<PipeProperties, NativeError> {
        if pipe == 0 {
            return Ok(PipeProperties::control(self.control_packet_size));
        }
        self.pipes
            .get(usize::from(pipe) - 1)
            .copied()
            .ok_or(NativeError::InvalidParam)
    }
}

/// A whole device, not claimed
pub struct LibUsbDevice {
    pub(crate) handle: DeviceHandle<Context>,
}

pub(crate) fn pipe_direction(direction: rusb::Direction) -> PipeDirection {
    match direction {
        rusb::Direction::In => PipeDirection::In,
        rusb::Direction::Out => PipeDirection::Out,
    }
}

pub(crate) fn transfer_kind(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}
