use super::{UsbAdapter, native_failure};
use crate::usb::UsbBackend;
use common::{
    CONTROL_TIMEOUTS, ControlSetup, MatchCriteria, NativeStep, PIPE_TIMEOUTS, PipeProperties,
    UsbError,
};
use std::fmt;
use tracing::{debug, info};

/// An opened USB interface, owned by the caller until [`UsbAdapter::close`]
pub struct InterfaceHandle<B: UsbBackend> {
    inner: B::Interface,
}

impl<B: UsbBackend> InterfaceHandle<B> {
    /// The backend's interface object
    pub fn native(&self) -> &B::Interface {
        &self.inner
    }
}

impl<B: UsbBackend> fmt::Debug for InterfaceHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceHandle").finish_non_exhaustive()
    }
}

impl<B: UsbBackend> UsbAdapter<B> {
    /// Find interface 0 of configuration 1 on the given device and open it
    ///
    /// Returns `Ok(None)` when no such interface is attached.
    pub fn find_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Option<InterfaceHandle<B>>, UsbError> {
        let criteria = MatchCriteria::interface(vendor_id, product_id);

        let Some(mut interface) =
            self.resolve(&criteria, |backend, plugin| backend.query_interface(plugin))?
        else {
            return Ok(None);
        };

        if let Err(e) = self.backend.open_interface(&mut interface) {
            self.backend.release_interface(interface);
            return Err(native_failure(NativeStep::InterfaceOpen, e));
        }

        info!("Opened interface 0 of {:04x}:{:04x}", vendor_id, product_id);
        Ok(Some(InterfaceHandle { inner: interface }))
    }

    /// Close the interface, then release it
    ///
    /// The release only happens once the close has succeeded. On failure the
    /// handle is handed back untouched so the close can be retried.
    pub fn close(
        &self,
        handle: InterfaceHandle<B>,
    ) -> Result<(), (InterfaceHandle<B>, UsbError)> {
        let mut interface = handle.inner;

        if let Err(e) = self.backend.close_interface(&mut interface) {
            let error = native_failure(NativeStep::InterfaceClose, e);
            return Err((InterfaceHandle { inner: interface }, error));
        }

        self.backend.release_interface(interface);
        debug!("Interface closed and released");
        Ok(())
    }

    /// Issue a control request on the interface's default pipe
    ///
    /// The data stage is the first `setup.length` bytes of `buffer`. Returns
    /// the byte count actually transferred, which never exceeds wLength.
    pub fn control(
        &self,
        handle: &mut InterfaceHandle<B>,
        setup: ControlSetup,
        buffer: &mut [u8],
    ) -> Result<usize, UsbError> {
        let length = usize::from(setup.length);
        let available = buffer.len();
        let data = buffer
            .get_mut(..length)
            .ok_or(UsbError::BufferTooSmall {
                needed: length,
                available,
            })?;

        let count = self
            .backend
            .control_request(&mut handle.inner, &setup, data, CONTROL_TIMEOUTS)
            .map_err(|e| native_failure(NativeStep::ControlRequest, e))?;

        Ok(count.min(length))
    }

    /// Read from `pipe` into `buffer`, returning the bytes read
    ///
    /// The buffer length is the transfer size; the count never exceeds it.
    pub fn read(
        &self,
        handle: &mut InterfaceHandle<B>,
        pipe: u8,
        buffer: &mut [u8],
    ) -> Result<usize, UsbError> {
        let size = buffer.len();

        let count = self
            .backend
            .read_pipe(&mut handle.inner, pipe, buffer, PIPE_TIMEOUTS)
            .map_err(|e| native_failure(NativeStep::ReadPipe, e))?;

        Ok(count.min(size))
    }

    /// Write all of `data` to `pipe`
    ///
    /// No count is returned: success means every byte was accepted.
    pub fn write(
        &self,
        handle: &mut InterfaceHandle<B>,
        pipe: u8,
        data: &[u8],
    ) -> Result<(), UsbError> {
        self.backend
            .write_pipe(&mut handle.inner, pipe, data, PIPE_TIMEOUTS)
            .map_err(|e| native_failure(NativeStep::WritePipe, e))
    }

    pub fn pipe_properties(
        &self,
        handle: &InterfaceHandle<B>,
        pipe: u8,
    ) -> Result<PipeProperties, UsbError> {
        self.backend
            .pipe_properties(&handle.inner, pipe)
            .map_err(|e| native_failure(NativeStep::GetPipeProperties, e))
    }

    /// Number of pipes besides the default control pipe
    pub fn pipe_count(&self, handle: &InterfaceHandle<B>) -> Result<u8, UsbError> {
        self.backend
            .pipe_count(&handle.inner)
            .map_err(|e| native_failure(NativeStep::GetPipeCount, e))
    }

    /// Properties of every pipe, control pipe first
    pub fn pipes(&self, handle: &InterfaceHandle<B>) -> Result<Vec<PipeProperties>, UsbError> {
        let count = self.pipe_count(handle)?;
        (0..=count)
            .map(|pipe| self.pipe_properties(handle, pipe))
            .collect()
    }
}
