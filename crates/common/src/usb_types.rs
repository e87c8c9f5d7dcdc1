//! USB value types shared by the adapter and its backends
//!
//! Everything here is an ephemeral value: built for one call and dropped after
//! it. None of these types own a native resource.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interface number matched by interface-level lookups
pub const DEFAULT_INTERFACE_NUMBER: u8 = 0;

/// Configuration value matched by interface-level lookups
pub const DEFAULT_CONFIGURATION_VALUE: u8 = 1;

/// Timeout pair passed with every transfer
///
/// `no_data` bounds the wait for the first data packet, `completion` bounds
/// the whole transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub no_data: Duration,
    pub completion: Duration,
}

impl Timeouts {
    pub const fn from_millis(no_data: u64, completion: u64) -> Self {
        Self {
            no_data: Duration::from_millis(no_data),
            completion: Duration::from_millis(completion),
        }
    }
}

/// Control requests: 1000ms without data, 4000ms to complete
pub const CONTROL_TIMEOUTS: Timeouts = Timeouts::from_millis(1000, 4000);

/// Pipe reads and writes: 100ms without data, 400ms to complete
pub const PIPE_TIMEOUTS: Timeouts = Timeouts::from_millis(100, 400);

/// Which level of the native object hierarchy a lookup matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceClass {
    /// A whole device
    Device,
    /// One interface of a device's configuration
    Interface,
}

/// Criteria for a single service lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCriteria {
    pub class: ServiceClass,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_number: Option<u8>,
    pub configuration_value: Option<u8>,
}

impl MatchCriteria {
    /// Interface 0 of configuration 1 on the given device
    pub fn interface(vendor_id: u16, product_id: u16) -> Self {
        Self {
            class: ServiceClass::Interface,
            vendor_id,
            product_id,
            interface_number: Some(DEFAULT_INTERFACE_NUMBER),
            configuration_value: Some(DEFAULT_CONFIGURATION_VALUE),
        }
    }

    /// The whole device, matched on vendor and product only
    pub fn device(vendor_id: u16, product_id: u16) -> Self {
        Self {
            class: ServiceClass::Device,
            vendor_id,
            product_id,
            interface_number: None,
            configuration_value: None,
        }
    }

    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Setup stage of a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl ControlSetup {
    /// Bit 7 of bmRequestType set means device-to-host
    pub fn is_in(&self) -> bool {
        (self.request_type & 0x80) != 0
    }
}

/// Pipe direction, encoded with the host stack's direction codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeDirection {
    Out = 0,
    In = 1,
    None = 2,
    Any = 3,
}

/// Endpoint transfer type, encoded as in bmAttributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Snapshot of one pipe's properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeProperties {
    pub direction: PipeDirection,
    /// Endpoint number, without the direction bit
    pub number: u8,
    pub transfer_type: TransferKind,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl PipeProperties {
    /// The default control pipe (pipe 0)
    pub fn control(max_packet_size: u16) -> Self {
        Self {
            direction: PipeDirection::Any,
            number: 0,
            transfer_type: TransferKind::Control,
            max_packet_size,
            interval: 0,
        }
    }

    /// Endpoint address as used on the bus
    pub fn endpoint_address(&self) -> u8 {
        match self.direction {
            PipeDirection::In => self.number | 0x80,
            _ => self.number,
        }
    }

    /// The five values in stack order: direction, number, type, size, interval
    pub fn to_cells(&self) -> [i64; 5] {
        [
            self.direction as i64,
            self.number as i64,
            self.transfer_type as i64,
            self.max_packet_size as i64,
            self.interval as i64,
        ]
    }
}

/// One attached device, as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}
