//! Interrupt Controller - Hardware interrupt controller capabilities
//!
//! # Purpose
//! Abstracts the per-core interrupt controller behind a single capability
//! trait so device servers and the scheduler never depend on a concrete
//! chip. Two variants are provided:
//! - [`LocalApic`]: Intel Local APIC, including bus-clock calibration of its
//!   countdown timer against a reference timer
//! - [`LegacyPic`]: the chained 8259 pair found on every PC
//!
//! # Integration Points
//! - Depends on: a register window ([`RegisterAccess`]) or port I/O ([`PortIo`])
//! - Provides to: device servers, the scheduler tick
//! - Capabilities required: MMIO mapping of the APIC page, or I/O port access
//!
//! # Testing Strategy
//! - Unit tests: register programming, mask bit handling, calibration math
//! - Mock doubles (`mock` feature): in-memory registers and reference timer

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

use core::fmt;

use static_assertions::const_assert_eq;
use thiserror::Error;

pub mod apic;
pub mod config;
pub mod mmio;
pub mod pic;
pub mod timer;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use apic::{LocalApic, Register, LOCAL_VECTOR_BASE, LVT_ENTRIES, TIMER_VECTOR};
pub use config::{ApicConfig, PicConfig};
pub use mmio::{MmioRegion, RegisterAccess};
pub use pic::{LegacyPic, PortIo, PIC_LINES};
pub use timer::{measure_hertz, DivideRatio, ReferenceTimer, TimerState};

#[cfg(target_arch = "x86_64")]
pub use pic::IoPorts;

/// Number of distinct interrupt vectors a processor can deliver
pub const MAX_VECTORS: usize = 256;

const_assert_eq!(MAX_VECTORS, u8::MAX as usize + 1);

/// Error types for interrupt controller operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("IRQ {irq} is not served by this controller")]
    InvalidIrq { irq: Vector },

    #[error("vector {raw} out of range")]
    InvalidVector { raw: usize },

    #[error("interrupt controller not initialized")]
    NotInitialized,

    #[error("register access failed at offset {offset:#x}")]
    RegisterAccess { offset: usize },

    #[error("timer calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
}

/// Reasons a timer calibration can be aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("reference timer unavailable")]
    ReferenceUnavailable,

    #[error("countdown did not advance during the reference interval")]
    NoTicksElapsed,

    #[error("reference interval must be non-zero")]
    InvalidInterval,

    #[error("measured {hertz} Hz cannot be expressed as a periodic count")]
    CountOutOfRange { hertz: u64 },
}

pub type Result<T> = core::result::Result<T, ControllerError>;

/// Interrupt vector as seen by the controller that delivers it
///
/// Always within `[0, MAX_VECTORS)`; raw numbers coming from outside
/// (kernel notifications, configuration) go through `TryFrom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(u8);

impl Vector {
    /// Create a vector from its 8-bit encoding
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for Vector {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl TryFrom<usize> for Vector {
    type Error = ControllerError;

    fn try_from(raw: usize) -> Result<Self> {
        u8::try_from(raw)
            .map(Self)
            .map_err(|_| ControllerError::InvalidVector { raw })
    }
}

impl TryFrom<u32> for Vector {
    type Error = ControllerError;

    fn try_from(raw: u32) -> Result<Self> {
        Self::try_from(raw as usize)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interrupt controller capability
///
/// One instance owns the controller of one processor core. Callers must run
/// [`initialize`](IntController::initialize) once before any other operation.
pub trait IntController {
    /// Enable interrupt delivery at the controller
    ///
    /// # Errors
    /// Returns `RegisterAccess` if the register region is inaccessible
    fn initialize(&mut self) -> Result<()>;

    /// Unmask a hardware interrupt
    ///
    /// # Errors
    /// Returns `InvalidIrq` if `irq` is not served by this controller
    fn enable(&mut self, irq: Vector) -> Result<()>;

    /// Mask a hardware interrupt
    ///
    /// # Errors
    /// Returns `InvalidIrq` if `irq` is not served by this controller
    fn disable(&mut self, irq: Vector) -> Result<()>;

    /// Signal end-of-interrupt for `irq`
    ///
    /// Re-arms the source so it can trigger again. Must be issued exactly
    /// once per delivered interrupt, after all handling of it completed.
    fn clear(&mut self, irq: Vector) -> Result<()>;

    /// Interrupt raised by this controller's timer
    fn timer_interrupt(&self) -> Vector;

    /// Calibrated timer frequency in Hertz, `None` before `start_timer`
    fn timer_frequency(&self) -> Option<u64>;

    /// Calibrate and start the periodic timer
    ///
    /// Blocks for one reference interval.
    ///
    /// # Errors
    /// Returns `Calibration` if the reference timer fails or the
    /// measurement is degenerate; the timer is left stopped.
    fn start_timer(&mut self, reference: &mut dyn ReferenceTimer) -> Result<()>;
}
