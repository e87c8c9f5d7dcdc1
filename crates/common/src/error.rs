//! Common error types
//!
//! Failures come in two layers. A [`NativeError`] is what the host USB stack
//! reported. A [`UsbError`] is what the adapter hands back to its caller: the
//! native step that failed, with the native cause attached as its source.
//! "Not found" is never an error; lookups report it as `Ok(None)`.

use std::fmt;
use thiserror::Error;

/// Failure reported by the host USB stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    /// Transfer timed out
    #[error("operation timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("pipe error")]
    Pipe,
    /// Device was disconnected
    #[error("no such device")]
    NoDevice,
    /// Device, interface or pipe not found
    #[error("entity not found")]
    NotFound,
    /// Device or interface is busy
    #[error("resource busy")]
    Busy,
    /// Device sent more data than requested
    #[error("overflow")]
    Overflow,
    /// I/O error
    #[error("input/output error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

/// The native step an operation was performing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStep {
    ServiceMatching,
    CreatePlugin,
    QueryInterface,
    InterfaceOpen,
    InterfaceClose,
    ControlRequest,
    DeviceRequest,
    ReadPipe,
    WritePipe,
    GetPipeProperties,
    GetPipeCount,
}

impl NativeStep {
    /// Fixed human-readable failure message for this step
    pub fn message(self) -> &'static str {
        match self {
            NativeStep::ServiceMatching => "service matching failed",
            NativeStep::CreatePlugin => "plugin creation failed",
            NativeStep::QueryInterface => "interface query failed",
            NativeStep::InterfaceOpen => "interface open failed",
            NativeStep::InterfaceClose => "interface close failed",
            NativeStep::ControlRequest => "control request failed",
            NativeStep::DeviceRequest => "device request failed",
            NativeStep::ReadPipe => "pipe read failed",
            NativeStep::WritePipe => "pipe write failed",
            NativeStep::GetPipeProperties => "pipe properties query failed",
            NativeStep::GetPipeCount => "pipe count query failed",
        }
    }
}

impl fmt::Display for NativeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Adapter-level error returned by every USB operation
#[derive(Debug, Error)]
pub enum UsbError {
    /// A native step failed; the message names only the step
    #[error("{step}")]
    Native {
        step: NativeStep,
        #[source]
        source: NativeError,
    },

    /// Control data stage longer than the buffer supplied for it
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

impl UsbError {
    pub fn native(step: NativeStep, source: NativeError) -> Self {
        UsbError::Native { step, source }
    }

    /// The failing native step, if this came from the native layer
    pub fn step(&self) -> Option<NativeStep> {
        match self {
            UsbError::Native { step, .. } => Some(*step),
            UsbError::BufferTooSmall { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_native_error_message_names_step_only() {
        let err = UsbError::native(NativeStep::InterfaceOpen, NativeError::Access);
        assert_eq!(err.to_string(), "interface open failed");
        assert_eq!(err.step(), Some(NativeStep::InterfaceOpen));
    }

    #[test]
    fn test_native_cause_is_source() {
        let err = UsbError::native(NativeStep::ReadPipe, NativeError::Timeout);
        let source = err.source().expect("native cause");
        assert_eq!(source.to_string(), "operation timed out");
    }

    #[test]
    fn test_buffer_too_small_display() {
        let err = UsbError::BufferTooSmall {
            needed: 64,
            available: 8,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("needed 64"));
        assert!(msg.contains("got 8"));
        assert_eq!(err.step(), None);
    }

    #[test]
    fn test_every_step_has_distinct_message() {
        let steps = [
            NativeStep::ServiceMatching,
            NativeStep::CreatePlugin,
            NativeStep::QueryInterface,
            NativeStep::InterfaceOpen,
            NativeStep::InterfaceClose,
            NativeStep::ControlRequest,
            NativeStep::DeviceRequest,
            NativeStep::ReadPipe,
            NativeStep::WritePipe,
            NativeStep::GetPipeProperties,
            NativeStep::GetPipeCount,
        ];
        let mut messages: Vec<_> = steps.iter().map(|s| s.message()).collect();
        messages.sort_unstable();
        messages.dedup();
        assert_eq!(messages.len(), steps.len());
    }

    #[test]
    fn test_usb_error_converts_into_common_error() {
        let err: Error = UsbError::native(NativeStep::WritePipe, NativeError::Pipe).into();
        assert_eq!(err.to_string(), "USB error: pipe write failed");
    }
}
