use super::{UsbAdapter, native_failure};
use crate::usb::UsbBackend;
use common::{ControlSetup, MatchCriteria, NativeStep, UsbError};
use tracing::{debug, info};

/// A whole device, owned by the caller until [`UsbAdapter::close_device`]
///
/// Device-level lookups do not open or claim anything.
pub struct DeviceHandle<B: UsbBackend> {
    inner: B::Device,
}

impl<B: UsbBackend> DeviceHandle<B> {
    pub fn native(&self) -> &B::Device {
        &self.inner
    }
}

impl<B: UsbBackend> UsbAdapter<B> {
    /// Find the first device with the given vendor and product IDs
    pub fn find_whole_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<DeviceHandle<B>>, UsbError> {
        let criteria = MatchCriteria::device(vendor_id, product_id);

        let device = self.resolve(&criteria, |backend, plugin| backend.query_device(plugin))?;
        if device.is_some() {
            info!("Found device {:04x}:{:04x}", vendor_id, product_id);
        }
        Ok(device.map(|inner| DeviceHandle { inner }))
    }

    pub fn close_device(&self, handle: DeviceHandle<B>) {
        self.backend.release_device(handle.inner);
        debug!("Device released");
    }

    /// Issue a control request on the whole device
    ///
    /// Waits until the request completes. No count is returned.
    pub fn device_request(
        &self,
        handle: &mut DeviceHandle<B>,
        setup: ControlSetup,
        buffer: &mut [u8],
    ) -> Result<(), UsbError> {
        let length = usize::from(setup.length);
        let available = buffer.len();
        let data = buffer
            .get_mut(..length)
            .ok_or(UsbError::BufferTooSmall {
                needed: length,
                available,
            })?;

        self.backend
            .device_request(&mut handle.inner, &setup, data)
            .map_err(|e| native_failure(NativeStep::DeviceRequest, e))?;

        Ok(())
    }
}
