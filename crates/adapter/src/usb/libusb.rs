//! libusb backend
//!
//! Maps the native steps of [`UsbBackend`] onto libusb:
//! - the "plugin" is an opened device handle, handed over to the typed object
//!   by the query step
//! - opening an interface claims it, detaching any kernel driver where the
//!   platform supports that
//! - closing an interface releases the claim

use super::UsbBackend;
use super::device::{LibUsbDevice, LibUsbInterface, LibUsbPlugin, LibUsbService};
use super::transfers::{self, UNLIMITED_TIMEOUT, map_rusb_error};
use common::{
    ControlSetup, DeviceSummary, MatchCriteria, NativeError, PipeProperties, ServiceClass, Timeouts,
};
use rusb::{Context, UsbContext};
use tracing::{debug, info, warn};

pub struct LibUsbBackend {
    context: Context,
}

impl LibUsbBackend {
    pub fn new() -> Result<Self, NativeError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl UsbBackend for LibUsbBackend {
    type Service = LibUsbService;
    type Plugin = LibUsbPlugin;
    type Interface = LibUsbInterface;
    type Device = LibUsbDevice;

    fn matching_service(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<Self::Service>, NativeError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let found = devices
            .iter()
            .find(|device| LibUsbService::matches(device, criteria));

        match &found {
            Some(device) => debug!(
                "Matched {:04x}:{:04x} at bus {} address {}",
                criteria.vendor_id,
                criteria.product_id,
                device.bus_number(),
                device.address()
            ),
            None => debug!(
                "No {:?} matching {:04x}:{:04x}",
                criteria.class, criteria.vendor_id, criteria.product_id
            ),
        }

        Ok(found.map(|device| LibUsbService {
            device,
            criteria: *criteria,
        }))
    }

    fn create_plugin(
        &self,
        service: Self::Service,
        class: ServiceClass,
    ) -> Result<Self::Plugin, NativeError> {
        let handle = service.device.open().map_err(|e| {
            warn!("Failed to open device {:?}: {}", service.device, e);
            map_rusb_error(e)
        })?;

        Ok(LibUsbPlugin {
            device: service.device,
            criteria: service.criteria,
            class,
            handle: Some(handle),
        })
    }

    fn query_interface(&self, plugin: &mut Self::Plugin) -> Result<Self::Interface, NativeError> {
        let handle = plugin.take_handle(ServiceClass::Interface)?;
        let number = plugin.criteria.interface_number.unwrap_or(0);
        let interface = LibUsbInterface::new(&plugin.device, handle, number)?;
        debug!(
            "Interface {} has {} pipes besides the control pipe",
            number,
            interface.pipes.len()
        );
        Ok(interface)
    }

    fn query_device(&self, plugin: &mut Self::Plugin) -> Result<Self::Device, NativeError> {
        let handle = plugin.take_handle(ServiceClass::Device)?;
        Ok(LibUsbDevice { handle })
    }

    fn release_plugin(&self, plugin: Self::Plugin) {
        debug!("Releasing plugin for {:?}", plugin.device);
        drop(plugin);
    }

    fn open_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError> {
        match interface.handle.set_auto_detach_kernel_driver(true) {
            Ok(()) => {}
            Err(rusb::Error::NotSupported) => {
                debug!("Kernel driver auto-detach not supported on this platform");
            }
            Err(e) => return Err(map_rusb_error(e)),
        }

        interface
            .handle
            .claim_interface(interface.number)
            .map_err(|e| {
                warn!("Failed to claim interface {}: {}", interface.number, e);
                map_rusb_error(e)
            })?;

        interface.claimed = true;
        info!("Claimed interface {}", interface.number);
        Ok(())
    }

    fn close_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError> {
        if !interface.claimed {
            return Err(NativeError::InvalidParam);
        }

        interface
            .handle
            .release_interface(interface.number)
            .map_err(map_rusb_error)?;

        interface.claimed = false;
        debug!("Released interface {}", interface.number);
        Ok(())
    }

    fn release_interface(&self, interface: Self::Interface) {
        debug!("Dropping handle for interface {}", interface.number);
        drop(interface);
    }

    fn release_device(&self, device: Self::Device) {
        debug!("Dropping device handle {:?}", device.handle.device());
        drop(device);
    }

    fn control_request(
        &self,
        interface: &mut Self::Interface,
        setup: &ControlSetup,
        data: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError> {
        transfers::control_transfer(&interface.handle, setup, data, timeouts.completion)
    }

    fn device_request(
        &self,
        device: &mut Self::Device,
        setup: &ControlSetup,
        data: &mut [u8],
    ) -> Result<usize, NativeError> {
        transfers::control_transfer(&device.handle, setup, data, UNLIMITED_TIMEOUT)
    }

    fn read_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        buffer: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError> {
        let properties = interface.pipe(pipe)?;
        transfers::read_pipe(&interface.handle, &properties, buffer, timeouts)
    }

    fn write_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        data: &[u8],
        timeouts: Timeouts,
    ) -> Result<(), NativeError> {
        let properties = interface.pipe(pipe)?;
        transfers::write_pipe(&interface.handle, &properties, data, timeouts)
    }

    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        pipe: u8,
    ) -> Result<PipeProperties, NativeError> {
        interface.pipe(pipe)
    }

    fn pipe_count(&self, interface: &Self::Interface) -> Result<u8, NativeError> {
        u8::try_from(interface.pipes.len()).map_err(|_| NativeError::Overflow)
    }

    fn list_devices(&self) -> Result<Vec<DeviceSummary>, NativeError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut summaries = Vec::new();

        for device in devices.iter() {
            match device.device_descriptor() {
                Ok(descriptor) => summaries.push(DeviceSummary {
                    bus_number: device.bus_number(),
                    address: device.address(),
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                }),
                Err(e) => debug!("Skipping {:?}: {}", device, e),
            }
        }

        Ok(summaries)
    }
}
