//! USB handle adapter
//!
//! Exposes USB device discovery, control transfers and pipe I/O to a small
//! stack-based language runtime. The typed API lives in [`adapter`]; the
//! operand-stack marshaling for the interpreter lives in [`words`]. All native
//! work goes through the [`usb::UsbBackend`] seam, implemented for real
//! hardware by [`usb::LibUsbBackend`].

pub mod adapter;
pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;
pub mod words;

pub use adapter::{DeviceHandle, InterfaceHandle, UsbAdapter};
pub use usb::{LibUsbBackend, UsbBackend};
pub use words::{Cell, Machine, UsbWords, Word, WordError};
