//! Common utilities for usb-adapter
//!
//! This crate provides the value types shared by the adapter, its backends and
//! the stack-word binding: match criteria, control setup packets, pipe
//! properties, fixed transfer timeouts, the error taxonomy and logging setup.

pub mod error;
pub mod logging;
pub mod usb_types;

pub use error::{Error, NativeError, NativeStep, Result, UsbError};
pub use logging::setup_logging;
pub use usb_types::{
    CONTROL_TIMEOUTS, ControlSetup, DeviceSummary, MatchCriteria, PIPE_TIMEOUTS, PipeDirection,
    PipeProperties, ServiceClass, Timeouts, TransferKind,
};
