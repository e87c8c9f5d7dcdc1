//! Stack-word binding
//!
//! Marshals the adapter's typed operations onto an interpreter's operand
//! stack. Inputs are consumed left to right, so the rightmost input is on top
//! of the stack and is popped first. Lookups push `handle -1` when found and a
//! single `0` when not.
//!
//! Native handles never appear on the stack. Each word that produces a handle
//! stores it in a table and pushes its non-zero id instead; closing removes
//! the id, so a second close of the same id is rejected as unknown. A close
//! that fails keeps the id so it can be retried.
//!
//! | word                      | stack effect                                        |
//! |---------------------------|-----------------------------------------------------|
//! | `usb-find-device`         | `( vid pid -- handle -1 \| 0 )`                      |
//! | `usb-close`               | `( handle -- )`                                     |
//! | `usb-control`             | `( type req value index length buf handle -- count )` |
//! | `usb-get-pipe-properties` | `( pipe handle -- dir number type size interval )`  |
//! | `usb-read`                | `( buf size pipe handle -- count )`                 |
//! | `usb-write`               | `( buf size pipe handle -- )`                       |
//! | `usb-device-find`         | `( vid pid -- dev -1 \| 0 )`                         |
//! | `usb-device-close`        | `( dev -- )`                                        |
//! | `usb-device-request`      | `( type req value index length buf dev -- )`        |

use crate::adapter::{DeviceHandle, InterfaceHandle, UsbAdapter};
use crate::usb::UsbBackend;
use common::{ControlSetup, UsbError};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// One operand stack cell
pub type Cell = i64;

/// Flag value for "found"
pub const TRUE: Cell = -1;

/// Flag value for "not found"
pub const FALSE: Cell = 0;

/// Failure of a word; the interpreter aborts with its message
#[derive(Debug, Error)]
pub enum WordError {
    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Invalid buffer: {len} bytes at {addr:#x}")]
    BadAddress { addr: Cell, len: usize },

    #[error("Unknown handle: {0}")]
    UnknownHandle(Cell),

    #[error("Argument out of range: {name} = {value}")]
    InvalidArgument { name: &'static str, value: Cell },

    #[error(transparent)]
    Usb(#[from] UsbError),
}

/// The interpreter side of the binding: operand stack and data memory
pub trait Machine {
    fn pop(&mut self) -> Result<Cell, WordError>;

    fn push(&mut self, value: Cell);

    /// `len` bytes of interpreter memory starting at `addr`
    fn bytes(&mut self, addr: Cell, len: usize) -> Result<&mut [u8], WordError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Word {
    FindDevice,
    Close,
    Control,
    GetPipeProperties,
    Read,
    Write,
    DeviceFind,
    DeviceClose,
    DeviceRequest,
}

impl Word {
    pub const ALL: [Word; 9] = [
        Word::FindDevice,
        Word::Close,
        Word::Control,
        Word::GetPipeProperties,
        Word::Read,
        Word::Write,
        Word::DeviceFind,
        Word::DeviceClose,
        Word::DeviceRequest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Word::FindDevice => "usb-find-device",
            Word::Close => "usb-close",
            Word::Control => "usb-control",
            Word::GetPipeProperties => "usb-get-pipe-properties",
            Word::Read => "usb-read",
            Word::Write => "usb-write",
            Word::DeviceFind => "usb-device-find",
            Word::DeviceClose => "usb-device-close",
            Word::DeviceRequest => "usb-device-request",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|word| word.name() == name)
    }
}

/// Handles owned on behalf of the interpreter, keyed by stack id
struct HandleTable<T> {
    next: Cell,
    entries: HashMap<Cell, T>,
}

impl<T> HandleTable<T> {
    fn new() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, value: T) -> Cell {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    fn get_mut(&mut self, id: Cell) -> Result<&mut T, WordError> {
        self.entries
            .get_mut(&id)
            .ok_or(WordError::UnknownHandle(id))
    }

    fn remove(&mut self, id: Cell) -> Result<T, WordError> {
        self.entries
            .remove(&id)
            .ok_or(WordError::UnknownHandle(id))
    }

    /// Put back an entry taken out by [`Self::remove`], under the same id
    fn restore(&mut self, id: Cell, value: T) {
        self.entries.insert(id, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct UsbWords<B: UsbBackend> {
    adapter: UsbAdapter<B>,
    interfaces: HandleTable<InterfaceHandle<B>>,
    devices: HandleTable<DeviceHandle<B>>,
}

impl<B: UsbBackend> UsbWords<B> {
    pub fn new(adapter: UsbAdapter<B>) -> Self {
        Self {
            adapter,
            interfaces: HandleTable::new(),
            devices: HandleTable::new(),
        }
    }

    pub fn adapter(&self) -> &UsbAdapter<B> {
        &self.adapter
    }

    /// Interfaces found and not yet closed
    pub fn open_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    /// Devices found and not yet closed
    pub fn open_devices(&self) -> usize {
        self.devices.len()
    }

    /// Run one word against `machine`
    pub fn execute<M: Machine>(&mut self, word: Word, machine: &mut M) -> Result<(), WordError> {
        debug!("Executing {}", word.name());
        match word {
            Word::FindDevice => self.find_device(machine),
            Word::Close => self.close(machine),
            Word::Control => self.control(machine),
            Word::GetPipeProperties => self.get_pipe_properties(machine),
            Word::Read => self.read(machine),
            Word::Write => self.write(machine),
            Word::DeviceFind => self.device_find(machine),
            Word::DeviceClose => self.device_close(machine),
            Word::DeviceRequest => self.device_request(machine),
        }
    }

    fn find_device<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let product_id = pop_u16(machine, "productId")?;
        let vendor_id = pop_u16(machine, "vendorId")?;

        match self.adapter.find_device(vendor_id, product_id)? {
            Some(handle) => {
                machine.push(self.interfaces.insert(handle));
                machine.push(TRUE);
            }
            None => machine.push(FALSE),
        }
        Ok(())
    }

    /// The id stays valid when the close fails
    fn close<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let handle = self.interfaces.remove(id)?;

        match self.adapter.close(handle) {
            Ok(()) => Ok(()),
            Err((handle, e)) => {
                self.interfaces.restore(id, handle);
                Err(e.into())
            }
        }
    }

    fn control<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let (setup, addr) = pop_control(machine)?;

        let handle = self.interfaces.get_mut(id)?;
        let buffer = machine.bytes(addr, usize::from(setup.length))?;

        match self.adapter.control(handle, setup, buffer) {
            Ok(count) => {
                machine.push(count as Cell);
                Ok(())
            }
            Err(e) => {
                machine.push(0);
                Err(e.into())
            }
        }
    }

    fn get_pipe_properties<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let pipe = pop_u8(machine, "pipe")?;

        let handle = self.interfaces.get_mut(id)?;
        let properties = self.adapter.pipe_properties(handle, pipe)?;

        for value in properties.to_cells() {
            machine.push(value);
        }
        Ok(())
    }

    fn read<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let pipe = pop_u8(machine, "pipe")?;
        let size = pop_len(machine, "size")?;
        let addr = machine.pop()?;

        let handle = self.interfaces.get_mut(id)?;
        let buffer = machine.bytes(addr, size)?;
        let count = self.adapter.read(handle, pipe, buffer)?;

        machine.push(count as Cell);
        Ok(())
    }

    fn write<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let pipe = pop_u8(machine, "pipe")?;
        let size = pop_len(machine, "size")?;
        let addr = machine.pop()?;

        let handle = self.interfaces.get_mut(id)?;
        let data = machine.bytes(addr, size)?;
        self.adapter.write(handle, pipe, data)?;
        Ok(())
    }

    fn device_find<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let product_id = pop_u16(machine, "productId")?;
        let vendor_id = pop_u16(machine, "vendorId")?;

        match self.adapter.find_whole_device(vendor_id, product_id)? {
            Some(handle) => {
                machine.push(self.devices.insert(handle));
                machine.push(TRUE);
            }
            None => machine.push(FALSE),
        }
        Ok(())
    }

    fn device_close<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let handle = self.devices.remove(id)?;
        self.adapter.close_device(handle);
        Ok(())
    }

    fn device_request<M: Machine>(&mut self, machine: &mut M) -> Result<(), WordError> {
        let id = machine.pop()?;
        let (setup, addr) = pop_control(machine)?;

        let handle = self.devices.get_mut(id)?;
        let buffer = machine.bytes(addr, usize::from(setup.length))?;
        self.adapter.device_request(handle, setup, buffer)?;
        Ok(())
    }
}

/// Pop `type req value index length buf`, top first
fn pop_control<M: Machine>(machine: &mut M) -> Result<(ControlSetup, Cell), WordError> {
    let addr = machine.pop()?;
    let length = pop_u16(machine, "wLength")?;
    let index = pop_u16(machine, "wIndex")?;
    let value = pop_u16(machine, "wValue")?;
    let request = pop_u8(machine, "bRequest")?;
    let request_type = pop_u8(machine, "bmRequestType")?;

    let setup = ControlSetup {
        request_type,
        request,
        value,
        index,
        length,
    };
    Ok((setup, addr))
}

fn pop_u8<M: Machine>(machine: &mut M, name: &'static str) -> Result<u8, WordError> {
    let value = machine.pop()?;
    u8::try_from(value).map_err(|_| WordError::InvalidArgument { name, value })
}

fn pop_u16<M: Machine>(machine: &mut M, name: &'static str) -> Result<u16, WordError> {
    let value = machine.pop()?;
    u16::try_from(value).map_err(|_| WordError::InvalidArgument { name, value })
}

fn pop_len<M: Machine>(machine: &mut M, name: &'static str) -> Result<usize, WordError> {
    let value = machine.pop()?;
    usize::try_from(value).map_err(|_| WordError::InvalidArgument { name, value })
}
