//! USB transfer execution
//!
//! Synchronous libusb transfers for control requests and pipe I/O, with rusb
//! errors mapped to [`NativeError`].
//!
//! libusb takes a single timeout per transfer, so the completion timeout of a
//! [`Timeouts`] pair is the one handed to it.

use common::{ControlSetup, NativeError, PipeDirection, PipeProperties, Timeouts, TransferKind};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// libusb treats a zero timeout as "wait until completion"
pub const UNLIMITED_TIMEOUT: Duration = Duration::ZERO;

/// Execute a control transfer
///
/// The direction comes from bit 7 of bmRequestType. `data` is exactly the
/// data stage, so the returned count never exceeds wLength.
pub fn control_transfer(
    handle: &DeviceHandle<Context>,
    setup: &ControlSetup,
    data: &mut [u8],
    timeout: Duration,
) -> Result<usize, NativeError> {
    debug!(
        "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, length={}",
        setup.request_type, setup.request, setup.value, setup.index, setup.length
    );

    let result = if setup.is_in() {
        handle.read_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            timeout,
        )
    } else {
        handle.write_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            timeout,
        )
    };

    match result {
        Ok(len) => {
            debug!("Control transfer succeeded: {} bytes", len);
            Ok(len)
        }
        Err(e) => {
            warn!("Control transfer failed: {}", e);
            Err(map_rusb_error(e))
        }
    }
}

/// Read from an IN pipe
///
/// Bulk and interrupt pipes are supported; anything else is rejected.
pub fn read_pipe(
    handle: &DeviceHandle<Context>,
    pipe: &PipeProperties,
    buffer: &mut [u8],
    timeouts: Timeouts,
) -> Result<usize, NativeError> {
    if pipe.direction != PipeDirection::In {
        warn!("Pipe for endpoint {:#x} is not an IN pipe", pipe.number);
        return Err(NativeError::InvalidParam);
    }

    let endpoint = pipe.endpoint_address();
    debug!(
        "Pipe read: endpoint={:#x}, size={}, timeout={}ms",
        endpoint,
        buffer.len(),
        timeouts.completion.as_millis()
    );

    let result = match pipe.transfer_type {
        TransferKind::Bulk => handle.read_bulk(endpoint, buffer, timeouts.completion),
        TransferKind::Interrupt => handle.read_interrupt(endpoint, buffer, timeouts.completion),
        other => {
            warn!("Unsupported pipe transfer type for read: {:?}", other);
            return Err(NativeError::InvalidParam);
        }
    };

    match result {
        Ok(len) => {
            debug!("Pipe read succeeded: {} bytes", len);
            Ok(len)
        }
        Err(e) => {
            warn!("Pipe read on endpoint {:#x} failed: {}", endpoint, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Write to an OUT pipe
///
/// A short write is reported as [`NativeError::Io`]: callers are promised
/// that success means every byte was accepted.
pub fn write_pipe(
    handle: &DeviceHandle<Context>,
    pipe: &PipeProperties,
    data: &[u8],
    timeouts: Timeouts,
) -> Result<(), NativeError> {
    if pipe.direction != PipeDirection::Out {
        warn!("Pipe for endpoint {:#x} is not an OUT pipe", pipe.number);
        return Err(NativeError::InvalidParam);
    }

    let endpoint = pipe.endpoint_address();
    debug!(
        "Pipe write: endpoint={:#x}, size={}, timeout={}ms",
        endpoint,
        data.len(),
        timeouts.completion.as_millis()
    );

    let result = match pipe.transfer_type {
        TransferKind::Bulk => handle.write_bulk(endpoint, data, timeouts.completion),
        TransferKind::Interrupt => handle.write_interrupt(endpoint, data, timeouts.completion),
        other => {
            warn!("Unsupported pipe transfer type for write: {:?}", other);
            return Err(NativeError::InvalidParam);
        }
    };

    match result {
        Ok(len) if len == data.len() => {
            debug!("Pipe write succeeded: {} bytes", len);
            Ok(())
        }
        Ok(len) => {
            warn!(
                "Short pipe write on endpoint {:#x}: {} of {} bytes",
                endpoint,
                len,
                data.len()
            );
            Err(NativeError::Io)
        }
        Err(e) => {
            warn!("Pipe write on endpoint {:#x} failed: {}", endpoint, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Map rusb::Error to NativeError
pub fn map_rusb_error(err: rusb::Error) -> NativeError {
    match err {
        rusb::Error::Timeout => NativeError::Timeout,
        rusb::Error::Pipe => NativeError::Pipe,
        rusb::Error::NoDevice => NativeError::NoDevice,
        rusb::Error::NotFound => NativeError::NotFound,
        rusb::Error::Busy => NativeError::Busy,
        rusb::Error::Overflow => NativeError::Overflow,
        rusb::Error::Io => NativeError::Io,
        rusb::Error::InvalidParam => NativeError::InvalidParam,
        rusb::Error::Access => NativeError::Access,
        _ => NativeError::Other {
            message: err.to_string(),
        },
    }
}
