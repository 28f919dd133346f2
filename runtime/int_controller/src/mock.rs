//! Mock hardware for host-side testing
//!
//! In-memory stand-ins for the register window, the 8259 I/O ports and the
//! reference timer. Enabled for this crate's tests and, through the `mock`
//! feature, for dependants that need a controller without hardware.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::apic::Register;
use crate::mmio::RegisterAccess;
use crate::pic::PortIo;
use crate::timer::ReferenceTimer;
use crate::{CalibrationError, ControllerError, Result};

/// Register window backed by a map, recording every write
///
/// Registers read as zero until written. When built with
/// [`with_elapsed_ticks`](MockRegisters::with_elapsed_ticks), reads of the
/// APIC Current Count register simulate a countdown that consumed a fixed
/// number of ticks since Initial Count was last loaded.
#[derive(Debug, Default)]
pub struct MockRegisters {
    values: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    inaccessible: bool,
    elapsed_ticks: Option<u32>,
}

impl MockRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window whose every access fails, like an unmapped page
    pub fn inaccessible() -> Self {
        Self {
            inaccessible: true,
            ..Self::default()
        }
    }

    /// Window whose countdown always advanced `ticks` during calibration
    pub fn with_elapsed_ticks(ticks: u32) -> Self {
        Self {
            elapsed_ticks: Some(ticks),
            ..Self::default()
        }
    }

    /// Set a register without recording a write
    pub fn preset(&mut self, offset: usize, value: u32) {
        self.values.insert(offset, value);
    }

    /// Current value of a register
    pub fn value(&self, offset: usize) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    /// Every write in issue order
    pub fn writes(&self) -> &[(usize, u32)] {
        &self.writes
    }

    /// Number of writes issued to `offset`
    pub fn writes_to(&self, offset: usize) -> usize {
        self.writes.iter().filter(|(o, _)| *o == offset).count()
    }
}

impl RegisterAccess for MockRegisters {
    fn read(&self, offset: usize) -> Result<u32> {
        if self.inaccessible {
            return Err(ControllerError::RegisterAccess { offset });
        }

        match self.elapsed_ticks {
            Some(ticks) if offset == Register::CurrentCount.offset() => Ok(self
                .value(Register::InitialCount.offset())
                .saturating_sub(ticks)),
            _ => Ok(self.value(offset)),
        }
    }

    fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        if self.inaccessible {
            return Err(ControllerError::RegisterAccess { offset });
        }

        self.values.insert(offset, value);
        self.writes.push((offset, value));
        Ok(())
    }
}

/// I/O port space backed by a map, recording every write
#[derive(Debug, Default)]
pub struct MockPorts {
    values: BTreeMap<u16, u8>,
    writes: Vec<(u16, u8)>,
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written to `port`
    pub fn value(&self, port: u16) -> u8 {
        self.values.get(&port).copied().unwrap_or(0)
    }

    /// Every write in issue order
    pub fn writes(&self) -> &[(u16, u8)] {
        &self.writes
    }

    /// Values written to `port` in issue order
    pub fn writes_to(&self, port: u16) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, value)| *value)
            .collect()
    }
}

impl PortIo for MockPorts {
    fn read_u8(&mut self, port: u16) -> u8 {
        self.value(port)
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        self.values.insert(port, value);
        self.writes.push((port, value));
    }
}

/// Reference timer that returns immediately
#[derive(Debug)]
pub struct MockReferenceTimer {
    interval_ms: u32,
    available: bool,
    waits: usize,
}

impl MockReferenceTimer {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            available: true,
            waits: 0,
        }
    }

    /// Reference whose every wait fails
    pub fn unavailable(interval_ms: u32) -> Self {
        Self {
            available: false,
            ..Self::new(interval_ms)
        }
    }

    /// Number of intervals waited for
    pub fn waits(&self) -> usize {
        self.waits
    }
}

impl ReferenceTimer for MockReferenceTimer {
    fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    fn wait_interval(&mut self) -> core::result::Result<(), CalibrationError> {
        if !self.available {
            return Err(CalibrationError::ReferenceUnavailable);
        }
        self.waits += 1;
        Ok(())
    }
}
