//! Device-facing value types
//!
//! Everything here is built through validating constructors so a value that
//! exists is a value the wire can carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_READ_BITS, MAX_SLAVE_ID, MIN_SLAVE_ID};
use crate::error::{ModbusError, Result};

/// Addressable slave id in `1..=247`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SlaveId(u8);

impl SlaveId {
    pub fn new(id: u8) -> Result<Self> {
        if (MIN_SLAVE_ID..=MAX_SLAVE_ID).contains(&id) {
            Ok(Self(id))
        } else {
            Err(ModbusError::invalid_argument(format!(
                "slave id {} outside {}..={}",
                id, MIN_SLAVE_ID, MAX_SLAVE_ID
            )))
        }
    }

    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SlaveId {
    type Error = ModbusError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One coil as last read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
    relay_id: u16,
    state: bool,
    address: u16,
}

impl RelayState {
    pub fn relay_id(&self) -> u16 {
        self.relay_id
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn address(&self) -> u16 {
        self.address
    }
}

/// One discrete input as last read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
    input_id: u16,
    state: bool,
    address: u16,
}

impl InputState {
    pub fn input_id(&self) -> u16 {
        self.input_id
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn address(&self) -> u16 {
        self.address
    }
}

/// Where the relays and inputs of one module live in its address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLayout {
    slave: SlaveId,
    relay_count: u16,
    input_count: u16,
    relay_start_address: u16,
    input_start_address: u16,
}

fn check_span(what: &str, start: u16, count: u16) -> Result<()> {
    if count == 0 || count > MAX_READ_BITS {
        return Err(ModbusError::invalid_argument(format!(
            "{} count {} outside 1..={}",
            what, count, MAX_READ_BITS
        )));
    }
    if start.checked_add(count - 1).is_none() {
        return Err(ModbusError::invalid_argument(format!(
            "{} span {}+{} exceeds address space",
            what, start, count
        )));
    }
    Ok(())
}

impl DeviceLayout {
    pub fn new(
        slave_id: u8,
        relay_count: u16,
        input_count: u16,
        relay_start_address: u16,
        input_start_address: u16,
    ) -> Result<Self> {
        let slave = SlaveId::new(slave_id)?;
        check_span("relay", relay_start_address, relay_count)?;
        check_span("input", input_start_address, input_count)?;
        Ok(Self {
            slave,
            relay_count,
            input_count,
            relay_start_address,
            input_start_address,
        })
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn relay_count(&self) -> u16 {
        self.relay_count
    }

    pub fn input_count(&self) -> u16 {
        self.input_count
    }

    pub fn relay_start_address(&self) -> u16 {
        self.relay_start_address
    }

    pub fn input_start_address(&self) -> u16 {
        self.input_start_address
    }

    /// `start + (id - 1)` for a 1-based relay id
    pub fn relay_address(&self, relay_id: u16) -> Result<u16> {
        address_of("relay", relay_id, self.relay_count, self.relay_start_address)
    }

    /// `start + (id - 1)` for a 1-based input id
    pub fn input_address(&self, input_id: u16) -> Result<u16> {
        address_of("input", input_id, self.input_count, self.input_start_address)
    }

    pub fn relay_state(&self, relay_id: u16, state: bool) -> Result<RelayState> {
        Ok(RelayState {
            relay_id,
            state,
            address: self.relay_address(relay_id)?,
        })
    }

    pub fn input_state(&self, input_id: u16, state: bool) -> Result<InputState> {
        Ok(InputState {
            input_id,
            state,
            address: self.input_address(input_id)?,
        })
    }

    /// Map bits read from the relay start address onto relay ids.
    ///
    /// Padding bits past `relay_count` are ignored.
    pub fn relay_states(&self, bits: &[bool]) -> Vec<RelayState> {
        bits.iter()
            .take(usize::from(self.relay_count))
            .zip(0u16..)
            .map(|(&state, offset)| RelayState {
                relay_id: offset + 1,
                state,
                address: self.relay_start_address + offset,
            })
            .collect()
    }

    pub fn input_states(&self, bits: &[bool]) -> Vec<InputState> {
        bits.iter()
            .take(usize::from(self.input_count))
            .zip(0u16..)
            .map(|(&state, offset)| InputState {
                input_id: offset + 1,
                state,
                address: self.input_start_address + offset,
            })
            .collect()
    }
}

fn address_of(what: &str, id: u16, count: u16, start: u16) -> Result<u16> {
    if id == 0 || id > count {
        return Err(ModbusError::invalid_argument(format!(
            "{} id {} outside 1..={}",
            what, id, count
        )));
    }
    // span was checked in DeviceLayout::new
    Ok(start + (id - 1))
}
