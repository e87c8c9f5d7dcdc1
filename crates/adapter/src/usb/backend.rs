//! Native backend seam
//!
//! Each method is one native step. The adapter drives them in the order the
//! host's plugin-based discovery requires:
//!
//! 1. [`UsbBackend::matching_service`] finds at most one service
//! 2. [`UsbBackend::create_plugin`] resolves the intermediate plugin for it
//! 3. [`UsbBackend::query_interface`] or [`UsbBackend::query_device`] obtains
//!    the typed object from the plugin
//! 4. [`UsbBackend::release_plugin`] drops the intermediate, whatever the
//!    query returned
//!
//! Interfaces are then opened before use and closed, then released, after.

use common::{
    ControlSetup, DeviceSummary, MatchCriteria, NativeError, PipeProperties, ServiceClass, Timeouts,
};

pub trait UsbBackend {
    /// A matched, not yet resolved, service
    type Service;
    /// Intermediate plugin object between service and typed interface
    type Plugin;
    /// Typed interface-level object
    type Interface;
    /// Typed device-level object
    type Device;

    /// Look up the first service matching `criteria`
    ///
    /// `Ok(None)` means nothing matched, which is not a failure.
    fn matching_service(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<Self::Service>, NativeError>;

    fn create_plugin(
        &self,
        service: Self::Service,
        class: ServiceClass,
    ) -> Result<Self::Plugin, NativeError>;

    fn query_interface(&self, plugin: &mut Self::Plugin) -> Result<Self::Interface, NativeError>;

    fn query_device(&self, plugin: &mut Self::Plugin) -> Result<Self::Device, NativeError>;

    fn release_plugin(&self, plugin: Self::Plugin);

    /// Claim the interface and instantiate its pipes
    fn open_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError>;

    fn close_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError>;

    fn release_interface(&self, interface: Self::Interface);

    fn release_device(&self, device: Self::Device);

    /// Control request on the interface's default pipe
    ///
    /// `data` is exactly the data stage. Returns the bytes transferred.
    fn control_request(
        &self,
        interface: &mut Self::Interface,
        setup: &ControlSetup,
        data: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError>;

    /// Control request on the whole device, waiting until completion
    fn device_request(
        &self,
        device: &mut Self::Device,
        setup: &ControlSetup,
        data: &mut [u8],
    ) -> Result<usize, NativeError>;

    /// Read up to `buffer.len()` bytes from `pipe`
    fn read_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        buffer: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError>;

    /// Write all of `data` to `pipe`
    fn write_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        data: &[u8],
        timeouts: Timeouts,
    ) -> Result<(), NativeError>;

    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        pipe: u8,
    ) -> Result<PipeProperties, NativeError>;

    /// Number of pipes besides the default control pipe
    fn pipe_count(&self, interface: &Self::Interface) -> Result<u8, NativeError>;

    fn list_devices(&self) -> Result<Vec<DeviceSummary>, NativeError>;
}
