//! Test utilities for usb-adapter
//!
//! Provides a recording [`MockBackend`] standing in for the host USB stack and
//! a [`VecMachine`] standing in for the interpreter.
//!
//! # Example
//!
//! ```
//! use usb_adapter::UsbAdapter;
//! use usb_adapter::test_utils::{MockBackend, create_mock_stlink};
//!
//! let backend = MockBackend::new().with_device(create_mock_stlink());
//! let adapter = UsbAdapter::new(backend.clone());
//!
//! let handle = adapter.find_device(0x0483, 0x5740).unwrap().expect("attached");
//! adapter.close(handle).unwrap();
//! assert!(!backend.calls().is_empty());
//! ```

use crate::usb::UsbBackend;
use crate::words::{Cell, Machine, WordError};
use common::{
    ControlSetup, DeviceSummary, MatchCriteria, NativeError, NativeStep, PipeDirection,
    PipeProperties, ServiceClass, Timeouts, TransferKind,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Vendor ID of the ST-Link style test device
pub const STLINK_VENDOR_ID: u16 = 0x0483;

/// Product ID of the ST-Link style test device
pub const STLINK_PRODUCT_ID: u16 = 0x5740;

/// One native call observed by the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    MatchingService(MatchCriteria),
    CreatePlugin { device: usize, class: ServiceClass },
    QueryInterface { device: usize },
    QueryDevice { device: usize },
    ReleasePlugin { device: usize },
    OpenInterface { device: usize },
    CloseInterface { device: usize },
    ReleaseInterface { device: usize },
    ReleaseDevice { device: usize },
    ControlRequest {
        device: usize,
        setup: ControlSetup,
        timeouts: Timeouts,
    },
    DeviceRequest { device: usize, setup: ControlSetup },
    ReadPipe {
        device: usize,
        pipe: u8,
        size: usize,
        timeouts: Timeouts,
    },
    WritePipe {
        device: usize,
        pipe: u8,
        data: Vec<u8>,
        timeouts: Timeouts,
    },
    PipeProperties { device: usize, pipe: u8 },
    PipeCount { device: usize },
    ListDevices,
}

/// A simulated attached device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub summary: DeviceSummary,
    /// Active configuration value
    pub configuration_value: u8,
    /// Interface numbers of the active configuration
    pub interfaces: Vec<u8>,
    /// Pipes 1..=N of interface 0
    pub pipes: Vec<PipeProperties>,
    pub control_packet_size: u16,
    /// Data returned by device-to-host control requests
    pub control_response: Vec<u8>,
    /// Data queued for pipe reads
    pub read_data: VecDeque<u8>,
}

impl MockDevice {
    /// Configuration 1 with interface 0, one bulk IN pipe and one bulk OUT pipe
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            summary: DeviceSummary {
                bus_number: 1,
                address: 1,
                vendor_id,
                product_id,
            },
            configuration_value: 1,
            interfaces: vec![0],
            pipes: vec![
                create_mock_pipe(PipeDirection::In, 1, TransferKind::Bulk),
                create_mock_pipe(PipeDirection::Out, 2, TransferKind::Bulk),
            ],
            control_packet_size: 64,
            control_response: Vec::new(),
            read_data: VecDeque::new(),
        }
    }

    pub fn with_address(mut self, bus_number: u8, address: u8) -> Self {
        self.summary.bus_number = bus_number;
        self.summary.address = address;
        self
    }

    pub fn with_configuration(mut self, configuration_value: u8) -> Self {
        self.configuration_value = configuration_value;
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<u8>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_pipes(mut self, pipes: Vec<PipeProperties>) -> Self {
        self.pipes = pipes;
        self
    }

    pub fn with_control_response(mut self, data: &[u8]) -> Self {
        self.control_response = data.to_vec();
        self
    }

    pub fn with_read_data(mut self, data: &[u8]) -> Self {
        self.read_data = data.iter().copied().collect();
        self
    }

    fn matches(&self, criteria: &MatchCriteria) -> bool {
        if !criteria.matches_ids(self.summary.vendor_id, self.summary.product_id) {
            return false;
        }
        if criteria.class == ServiceClass::Device {
            return true;
        }
        let configuration_ok = criteria
            .configuration_value
            .is_none_or(|value| value == self.configuration_value);
        let interface_ok = criteria
            .interface_number
            .is_none_or(|number| self.interfaces.contains(&number));
        configuration_ok && interface_ok
    }

    fn pipe(&self, pipe: u8) -> Result<PipeProperties, NativeError> {
        if pipe == 0 {
            return Ok(PipeProperties::control(self.control_packet_size));
        }
        self.pipes
            .get(usize::from(pipe) - 1)
            .copied()
            .ok_or(NativeError::InvalidParam)
    }
}

/// Create pipe properties with a 64-byte packet size
pub fn create_mock_pipe(
    direction: PipeDirection,
    number: u8,
    kind: TransferKind,
) -> PipeProperties {
    PipeProperties {
        direction,
        number,
        transfer_type: kind,
        max_packet_size: 64,
        interval: if kind == TransferKind::Interrupt { 10 } else { 0 },
    }
}

/// Create the ST-Link style device used across the tests
pub fn create_mock_stlink() -> MockDevice {
    MockDevice::new(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    calls: Vec<MockCall>,
    failures: HashMap<NativeStep, NativeError>,
}

/// Recording stand-in for the host USB stack
///
/// Clones share state, so a test can hand one clone to the adapter and
/// inspect the calls through another.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

pub struct MockService {
    device: usize,
}

pub struct MockPlugin {
    device: usize,
    class: ServiceClass,
}

#[derive(Debug)]
pub struct MockInterface {
    pub device: usize,
    pub open: bool,
}

#[derive(Debug)]
pub struct MockDeviceRef {
    pub device: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: MockDevice) -> Self {
        self.state().devices.push(device);
        self
    }

    /// Make every later call of `step` fail with `error`
    pub fn fail(&self, step: NativeStep, error: NativeError) {
        self.state().failures.insert(step, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Bytes queued for pipe reads on `device`
    pub fn queue_read_data(&self, device: usize, data: &[u8]) {
        if let Some(mock) = self.state().devices.get_mut(device) {
            mock.read_data.extend(data.iter().copied());
        }
    }

    /// Every attempted pipe write, in order, as `(pipe, data)`
    pub fn written(&self) -> Vec<(u8, Vec<u8>)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::WritePipe { pipe, data, .. } => Some((*pipe, data.clone())),
                _ => None,
            })
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `call`, then fail if `step` was set to fail
    fn enter(
        &self,
        call: MockCall,
        step: NativeStep,
    ) -> Result<MutexGuard<'_, MockState>, NativeError> {
        let mut state = self.state();
        state.calls.push(call);
        match state.failures.get(&step) {
            Some(error) => Err(error.clone()),
            None => Ok(state),
        }
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }
}

impl UsbBackend for MockBackend {
    type Service = MockService;
    type Plugin = MockPlugin;
    type Interface = MockInterface;
    type Device = MockDeviceRef;

    fn matching_service(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Option<Self::Service>, NativeError> {
        let call = MockCall::MatchingService(*criteria);
        let state = self.enter(call, NativeStep::ServiceMatching)?;
        Ok(state
            .devices
            .iter()
            .position(|device| device.matches(criteria))
            .map(|device| MockService { device }))
    }

    fn create_plugin(
        &self,
        service: Self::Service,
        class: ServiceClass,
    ) -> Result<Self::Plugin, NativeError> {
        let call = MockCall::CreatePlugin {
            device: service.device,
            class,
        };
        drop(self.enter(call, NativeStep::CreatePlugin)?);
        Ok(MockPlugin {
            device: service.device,
            class,
        })
    }

    fn query_interface(&self, plugin: &mut Self::Plugin) -> Result<Self::Interface, NativeError> {
        let call = MockCall::QueryInterface {
            device: plugin.device,
        };
        drop(self.enter(call, NativeStep::QueryInterface)?);
        if plugin.class != ServiceClass::Interface {
            return Err(NativeError::InvalidParam);
        }
        Ok(MockInterface {
            device: plugin.device,
            open: false,
        })
    }

    fn query_device(&self, plugin: &mut Self::Plugin) -> Result<Self::Device, NativeError> {
        let call = MockCall::QueryDevice {
            device: plugin.device,
        };
        drop(self.enter(call, NativeStep::QueryInterface)?);
        if plugin.class != ServiceClass::Device {
            return Err(NativeError::InvalidParam);
        }
        Ok(MockDeviceRef {
            device: plugin.device,
        })
    }

    fn release_plugin(&self, plugin: Self::Plugin) {
        self.record(MockCall::ReleasePlugin {
            device: plugin.device,
        });
    }

    fn open_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError> {
        let call = MockCall::OpenInterface {
            device: interface.device,
        };
        drop(self.enter(call, NativeStep::InterfaceOpen)?);
        if interface.open {
            return Err(NativeError::Busy);
        }
        interface.open = true;
        Ok(())
    }

    fn close_interface(&self, interface: &mut Self::Interface) -> Result<(), NativeError> {
        let call = MockCall::CloseInterface {
            device: interface.device,
        };
        drop(self.enter(call, NativeStep::InterfaceClose)?);
        if !interface.open {
            return Err(NativeError::InvalidParam);
        }
        interface.open = false;
        Ok(())
    }

    fn release_interface(&self, interface: Self::Interface) {
        self.record(MockCall::ReleaseInterface {
            device: interface.device,
        });
    }

    fn release_device(&self, device: Self::Device) {
        self.record(MockCall::ReleaseDevice {
            device: device.device,
        });
    }

    fn control_request(
        &self,
        interface: &mut Self::Interface,
        setup: &ControlSetup,
        data: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError> {
        let call = MockCall::ControlRequest {
            device: interface.device,
            setup: *setup,
            timeouts,
        };
        let state = self.enter(call, NativeStep::ControlRequest)?;
        Ok(mock_control(&state.devices[interface.device], setup, data))
    }

    fn device_request(
        &self,
        device: &mut Self::Device,
        setup: &ControlSetup,
        data: &mut [u8],
    ) -> Result<usize, NativeError> {
        let call = MockCall::DeviceRequest {
            device: device.device,
            setup: *setup,
        };
        let state = self.enter(call, NativeStep::DeviceRequest)?;
        Ok(mock_control(&state.devices[device.device], setup, data))
    }

    fn read_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        buffer: &mut [u8],
        timeouts: Timeouts,
    ) -> Result<usize, NativeError> {
        let call = MockCall::ReadPipe {
            device: interface.device,
            pipe,
            size: buffer.len(),
            timeouts,
        };
        let mut state = self.enter(call, NativeStep::ReadPipe)?;
        let device = &mut state.devices[interface.device];
        if device.pipe(pipe)?.direction != PipeDirection::In {
            return Err(NativeError::InvalidParam);
        }

        let count = buffer.len().min(device.read_data.len());
        for (slot, byte) in buffer.iter_mut().zip(device.read_data.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write_pipe(
        &self,
        interface: &mut Self::Interface,
        pipe: u8,
        data: &[u8],
        timeouts: Timeouts,
    ) -> Result<(), NativeError> {
        let call = MockCall::WritePipe {
            device: interface.device,
            pipe,
            data: data.to_vec(),
            timeouts,
        };
        let state = self.enter(call, NativeStep::WritePipe)?;
        if state.devices[interface.device].pipe(pipe)?.direction != PipeDirection::Out {
            return Err(NativeError::InvalidParam);
        }
        Ok(())
    }

    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        pipe: u8,
    ) -> Result<PipeProperties, NativeError> {
        let call = MockCall::PipeProperties {
            device: interface.device,
            pipe,
        };
        let state = self.enter(call, NativeStep::GetPipeProperties)?;
        state.devices[interface.device].pipe(pipe)
    }

    fn pipe_count(&self, interface: &Self::Interface) -> Result<u8, NativeError> {
        let call = MockCall::PipeCount {
            device: interface.device,
        };
        let state = self.enter(call, NativeStep::GetPipeCount)?;
        let count = state.devices[interface.device].pipes.len();
        u8::try_from(count).map_err(|_| NativeError::Overflow)
    }

    fn list_devices(&self) -> Result<Vec<DeviceSummary>, NativeError> {
        let state = self.enter(MockCall::ListDevices, NativeStep::ServiceMatching)?;
        Ok(state.devices.iter().map(|device| device.summary.clone()).collect())
    }
}

/// IN requests copy the canned response; OUT requests accept the whole stage
fn mock_control(device: &MockDevice, setup: &ControlSetup, data: &mut [u8]) -> usize {
    if setup.is_in() {
        let count = data.len().min(device.control_response.len());
        data[..count].copy_from_slice(&device.control_response[..count]);
        count
    } else {
        data.len()
    }
}

/// Operand stack and byte memory standing in for the interpreter
#[derive(Debug, Clone, Default)]
pub struct VecMachine {
    pub stack: Vec<Cell>,
    pub memory: Vec<u8>,
}

impl VecMachine {
    /// Empty stack over `memory_size` zeroed bytes
    pub fn new(memory_size: usize) -> Self {
        Self {
            stack: Vec::new(),
            memory: vec![0; memory_size],
        }
    }

    pub fn push_all(&mut self, cells: &[Cell]) {
        self.stack.extend_from_slice(cells);
    }
}

impl Machine for VecMachine {
    fn pop(&mut self) -> Result<Cell, WordError> {
        self.stack.pop().ok_or(WordError::StackUnderflow)
    }

    fn push(&mut self, value: Cell) {
        self.stack.push(value);
    }

    fn bytes(&mut self, addr: Cell, len: usize) -> Result<&mut [u8], WordError> {
        let bad = WordError::BadAddress { addr, len };
        let Ok(start) = usize::try_from(addr) else {
            return Err(bad);
        };
        let Some(end) = start.checked_add(len) else {
            return Err(bad);
        };
        self.memory.get_mut(start..end).ok_or(bad)
    }
}
