//! Controller configuration
//!
//! Compile-time defaults for the supported controllers. Platform code
//! overrides individual fields when the board differs from a standard PC.

use crate::timer::DivideRatio;

/// Physical base of the Local APIC register page
pub const APIC_BASE: usize = 0xfee0_0000;

/// Size of the Local APIC register page
pub const APIC_REGION_SIZE: usize = 0x1000;

/// Periodic timer rate programmed after calibration
pub const DEFAULT_TIMER_RATE_HZ: u32 = 1000;

/// Vector reported for spurious APIC interrupts
pub const DEFAULT_SPURIOUS_VECTOR: u8 = 0xff;

/// CPU vector of legacy IRQ 0 (master 8259)
pub const LEGACY_MASTER_OFFSET: u8 = 32;

/// CPU vector of legacy IRQ 8 (slave 8259)
pub const LEGACY_SLAVE_OFFSET: u8 = 40;

/// Local APIC configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApicConfig {
    /// Physical base address of the register page
    pub base: usize,

    /// Periodic timer interrupts per second
    pub timer_rate_hz: u32,

    /// Countdown clock divider used for calibration and periodic mode
    pub divide: DivideRatio,

    /// Vector field of the spurious interrupt register
    pub spurious_vector: u8,
}

impl Default for ApicConfig {
    fn default() -> Self {
        Self {
            base: APIC_BASE,
            timer_rate_hz: DEFAULT_TIMER_RATE_HZ,
            divide: DivideRatio::By16,
            spurious_vector: DEFAULT_SPURIOUS_VECTOR,
        }
    }
}

/// Legacy 8259 PIC configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicConfig {
    /// CPU vector of master line 0
    pub master_offset: u8,

    /// CPU vector of slave line 0
    pub slave_offset: u8,
}

impl Default for PicConfig {
    fn default() -> Self {
        Self {
            master_offset: LEGACY_MASTER_OFFSET,
            slave_offset: LEGACY_SLAVE_OFFSET,
        }
    }
}
