//! USB handle adapter
//!
//! Typed operations over a [`UsbBackend`]. Every operation is one blocking
//! request/response against the native layer. A native failure ends the call
//! with a [`UsbError`] naming the failing step; nothing is retried and nothing
//! is partially recovered. Not finding a device is not a failure.
//!
//! The adapter holds no state besides its backend. Handles belong to the
//! caller from lookup until close.

mod device;
mod interface;

pub use device::DeviceHandle;
pub use interface::InterfaceHandle;

use crate::usb::UsbBackend;
use common::{DeviceSummary, MatchCriteria, NativeError, NativeStep, UsbError};
use tracing::{debug, warn};

pub struct UsbAdapter<B: UsbBackend> {
    backend: B,
}

impl<B: UsbBackend> UsbAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Every device currently attached
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, UsbError> {
        self.backend
            .list_devices()
            .map_err(|e| native_failure(NativeStep::ServiceMatching, e))
    }

    /// Match a service and resolve it into a typed object
    ///
    /// The plugin is released right after `query`, before the query result is
    /// looked at, so a failed query never leaks it.
    fn resolve<T>(
        &self,
        criteria: &MatchCriteria,
        query: impl FnOnce(&B, &mut B::Plugin) -> Result<T, NativeError>,
    ) -> Result<Option<T>, UsbError> {
        let service = self
            .backend
            .matching_service(criteria)
            .map_err(|e| native_failure(NativeStep::ServiceMatching, e))?;

        let Some(service) = service else {
            debug!(
                "No {:?} found for {:04x}:{:04x}",
                criteria.class, criteria.vendor_id, criteria.product_id
            );
            return Ok(None);
        };

        let mut plugin = self
            .backend
            .create_plugin(service, criteria.class)
            .map_err(|e| native_failure(NativeStep::CreatePlugin, e))?;

        let queried = query(&self.backend, &mut plugin);
        self.backend.release_plugin(plugin);

        queried
            .map(Some)
            .map_err(|e| native_failure(NativeStep::QueryInterface, e))
    }
}

fn native_failure(step: NativeStep, source: NativeError) -> UsbError {
    warn!("{}: {}", step, source);
    UsbError::native(step, source)
}
