//! USB subsystem
//!
//! The native layer underneath the adapter:
//! - [`backend`] defines the step-by-step seam every backend implements
//! - [`libusb`] implements it on top of rusb
//! - [`device`] holds the libusb service, plugin, interface and device objects
//! - [`transfers`] runs the blocking control and pipe transfers

pub mod backend;
pub mod device;
pub mod libusb;
pub mod transfers;

pub use backend::UsbBackend;
pub use device::{LibUsbDevice, LibUsbInterface, LibUsbPlugin, LibUsbService};
pub use libusb::LibUsbBackend;
