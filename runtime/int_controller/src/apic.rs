//! Intel Local APIC (Advanced Programmable Interrupt Controller)
//!
//! The Local APIC sits between a core and its interrupt sources. It is
//! programmed through a 4 KiB register page at [`APIC_BASE`](crate::config::APIC_BASE).
//!
//! ## Local Vector Table
//!
//! Every local interrupt source has an LVT entry holding its vector (bits
//! 0-7) and a mask bit (bit 16). `initialize()` gives the six entries fixed
//! vectors starting at [`LOCAL_VECTOR_BASE`], all masked:
//!
//! | Entry         | Vector |
//! |---------------|--------|
//! | Timer         | 48     |
//! | ThermalSensor | 49     |
//! | PerfCounters  | 50     |
//! | LocalInt0     | 51     |
//! | LocalInt1     | 52     |
//! | Error         | 53     |
//!
//! The legacy IRQ window (32-47) ends below the timer vector, so the timer
//! never aliases an externally routed interrupt.
//!
//! ## Timer
//!
//! The countdown timer runs at the bus clock divided by the Divide
//! Configuration register. Its real rate is measured in `start_timer()`, see
//! [`crate::timer`].

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::config::{ApicConfig, APIC_REGION_SIZE, LEGACY_SLAVE_OFFSET};
use crate::mmio::{MmioRegion, RegisterAccess};
use crate::timer::{measure_hertz, periodic_count, ReferenceTimer, TimerState};
use crate::{ControllerError, IntController, Result, Vector};

/// Hardware registers (byte offsets from the register page base)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Register {
    Identifier = 0x20,
    Version = 0x30,
    TaskPriority = 0x80,
    ArbitrationPriority = 0x90,
    ProcessorPriority = 0xa0,
    EndOfInterrupt = 0xb0,
    SpuriousIntVec = 0xf0,
    InService = 0x100,
    TriggerMode = 0x180,
    IntRequest = 0x200,
    ErrorStatus = 0x280,
    IntCommand1 = 0x300,
    IntCommand2 = 0x310,
    Timer = 0x320,
    ThermalSensor = 0x330,
    PerfCounters = 0x340,
    LocalInt0 = 0x350,
    LocalInt1 = 0x360,
    Error = 0x370,
    InitialCount = 0x380,
    CurrentCount = 0x390,
    DivideConfig = 0x3e0,
}

impl Register {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Spurious Interrupt Vector Register flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpuriousFlags: u32 {
        /// Software enable of the whole controller
        const APIC_ENABLE = 0x100;
    }
}

bitflags! {
    /// Local Vector Table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LvtFlags: u32 {
        /// Interrupt is not delivered
        const MASKED = 1 << 16;
        /// Timer reloads its initial count on expiry
        const PERIODIC = 1 << 17;
    }
}

/// Vector field of an LVT entry
const LVT_VECTOR_MASK: u32 = 0xff;

/// First vector assigned to the Local Vector Table
pub const LOCAL_VECTOR_BASE: u8 = 48;

/// APIC timer interrupt vector is fixed at 48
pub const TIMER_VECTOR: Vector = Vector::new(LOCAL_VECTOR_BASE);

/// LVT entries in vector order
pub const LVT_ENTRIES: [Register; 6] = [
    Register::Timer,
    Register::ThermalSensor,
    Register::PerfCounters,
    Register::LocalInt0,
    Register::LocalInt1,
    Register::Error,
];

/// Count loaded while measuring the bus clock
const CALIBRATION_COUNT: u32 = u32::MAX;

const_assert!(LOCAL_VECTOR_BASE as usize >= LEGACY_SLAVE_OFFSET as usize + 8);
const_assert!(LOCAL_VECTOR_BASE as usize + LVT_ENTRIES.len() <= u8::MAX as usize);

/// Local APIC driver over a register window
pub struct LocalApic<R> {
    regs: R,
    config: ApicConfig,
    initialized: bool,
    timer: Option<TimerState>,
}

impl LocalApic<MmioRegion> {
    /// Create a Local APIC driver over a mapped register page
    ///
    /// # Safety
    /// `virt_base` must be a valid uncached mapping of the APIC page owned
    /// exclusively by this driver.
    pub unsafe fn from_mapping(virt_base: usize, config: ApicConfig) -> Self {
        // SAFETY: forwarded to the caller.
        Self::new(unsafe { MmioRegion::new(virt_base, APIC_REGION_SIZE) }, config)
    }
}

impl<R: RegisterAccess> LocalApic<R> {
    /// Create a new Local APIC driver
    pub fn new(regs: R, config: ApicConfig) -> Self {
        Self {
            regs,
            config,
            initialized: false,
            timer: None,
        }
    }

    pub fn config(&self) -> &ApicConfig {
        &self.config
    }

    /// Register window the driver programs
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Calibrated timer state, if `start_timer` succeeded
    pub fn timer_state(&self) -> Option<&TimerState> {
        self.timer.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the APIC ID of this processor
    pub fn id(&self) -> Result<u8> {
        Ok(((self.regs.read(Register::Identifier.offset())? >> 24) & 0xff) as u8)
    }

    /// Returns the APIC version register
    pub fn version(&self) -> Result<u32> {
        self.regs.read(Register::Version.offset())
    }

    /// Latch and read the Error Status Register
    pub fn error_status(&mut self) -> Result<u32> {
        // ESR only updates after a write
        self.regs.write(Register::ErrorStatus.offset(), 0)?;
        self.regs.read(Register::ErrorStatus.offset())
    }

    /// LVT entry that delivers `irq`
    fn lvt_entry(irq: Vector) -> Result<Register> {
        irq.as_u8()
            .checked_sub(LOCAL_VECTOR_BASE)
            .and_then(|index| LVT_ENTRIES.get(usize::from(index)))
            .copied()
            .ok_or(ControllerError::InvalidIrq { irq })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ControllerError::NotInitialized)
        }
    }

    /// Mask the timer and stop its countdown
    fn stop_timer(&mut self) -> Result<()> {
        self.regs.write(
            Register::Timer.offset(),
            LvtFlags::MASKED.bits() | u32::from(TIMER_VECTOR.as_u8()),
        )?;
        self.regs.write(Register::InitialCount.offset(), 0)
    }

    fn calibrate(&mut self, reference: &mut dyn ReferenceTimer) -> Result<TimerState> {
        let divide = self.config.divide;

        // One-shot and masked while measuring
        self.stop_timer()?;
        self.regs
            .write(Register::DivideConfig.offset(), divide.encoding())?;
        self.regs
            .write(Register::InitialCount.offset(), CALIBRATION_COUNT)?;

        reference.wait_interval()?;

        let current = self.regs.read(Register::CurrentCount.offset())?;
        let consumed = CALIBRATION_COUNT.saturating_sub(current);
        let hertz = measure_hertz(consumed, reference.interval_ms(), divide)?;
        let initial_count = periodic_count(hertz, self.config.timer_rate_hz)?;

        log::debug!(
            "APIC timer consumed {} ticks in {} ms",
            consumed,
            reference.interval_ms()
        );

        self.regs.write(
            Register::Timer.offset(),
            LvtFlags::PERIODIC.bits() | u32::from(TIMER_VECTOR.as_u8()),
        )?;
        self.regs
            .write(Register::InitialCount.offset(), initial_count)?;

        Ok(TimerState {
            hertz,
            divide,
            periodic: true,
            initial_count,
        })
    }
}

impl<R: RegisterAccess> IntController for LocalApic<R> {
    fn initialize(&mut self) -> Result<()> {
        // Accept all priorities
        self.regs.write(Register::TaskPriority.offset(), 0)?;

        for (index, entry) in LVT_ENTRIES.iter().enumerate() {
            let vector = u32::from(LOCAL_VECTOR_BASE) + index as u32;
            self.regs
                .write(entry.offset(), LvtFlags::MASKED.bits() | vector)?;
        }

        let svr = self.regs.read(Register::SpuriousIntVec.offset())?;
        let svr = (svr & !LVT_VECTOR_MASK)
            | SpuriousFlags::APIC_ENABLE.bits()
            | u32::from(self.config.spurious_vector);
        self.regs.write(Register::SpuriousIntVec.offset(), svr)?;

        self.initialized = true;
        log::info!(
            "Local APIC enabled (spurious vector {:#x})",
            self.config.spurious_vector
        );
        Ok(())
    }

    fn enable(&mut self, irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        let entry = Self::lvt_entry(irq)?;
        self.regs.unset(entry.offset(), LvtFlags::MASKED.bits())
    }

    fn disable(&mut self, irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        let entry = Self::lvt_entry(irq)?;
        self.regs.set(entry.offset(), LvtFlags::MASKED.bits())
    }

    fn clear(&mut self, _irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        // EOI retires the highest in-service vector, whichever it is
        self.regs.write(Register::EndOfInterrupt.offset(), 0)
    }

    fn timer_interrupt(&self) -> Vector {
        TIMER_VECTOR
    }

    fn timer_frequency(&self) -> Option<u64> {
        self.timer.map(|state| state.hertz)
    }

    fn start_timer(&mut self, reference: &mut dyn ReferenceTimer) -> Result<()> {
        self.ensure_initialized()?;
        self.timer = None;

        match self.calibrate(reference) {
            Ok(state) => {
                log::info!(
                    "APIC timer calibrated: {} Hz, {} interrupts/s (initial count {})",
                    state.hertz,
                    self.config.timer_rate_hz,
                    state.initial_count
                );
                self.timer = Some(state);
                Ok(())
            }
            Err(err) => {
                if let Err(stop_err) = self.stop_timer() {
                    log::error!("failed to stop APIC timer: {}", stop_err);
                }
                log::warn!("APIC timer calibration failed: {}", err);
                Err(err)
            }
        }
    }
}
