//! Legacy 8259 Programmable Interrupt Controller
//!
//! Two chained 8259A chips serve IRQ lines 0-15: lines 0-7 on the master,
//! 8-15 on the slave wired to master line 2. Both are remapped away from the
//! CPU exception vectors during `initialize()`.
//!
//! The 8259 has no timer of its own; line 0 is driven by the PIT, so the timer
//! frequency is simply the rate of the reference timer.

use crate::config::PicConfig;
use crate::timer::ReferenceTimer;
use crate::{CalibrationError, ControllerError, IntController, Result, Vector};

/// Number of IRQ lines behind the chained pair
pub const PIC_LINES: u8 = 16;

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xa0;
const SLAVE_DATA: u16 = 0xa1;

/// ICW1: start initialization, ICW4 follows
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode
const ICW4_8086: u8 = 0x01;
/// Non-specific end of interrupt
const OCW2_EOI: u8 = 0x20;

/// Master line the slave is cascaded on
const CASCADE_LINE: u8 = 2;

/// Line driven by the PIT
const TIMER_LINE: Vector = Vector::new(0);

/// Byte-wide x86 I/O port access
pub trait PortIo {
    fn read_u8(&mut self, port: u16) -> u8;
    fn write_u8(&mut self, port: u16, value: u8);
}

/// Direct port access through `in`/`out`
#[cfg(target_arch = "x86_64")]
pub struct IoPorts {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl IoPorts {
    /// # Safety
    /// The caller must hold I/O privilege for the 8259 ports and be the only
    /// user of them.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl PortIo for IoPorts {
    fn read_u8(&mut self, port: u16) -> u8 {
        let value: u8;
        // SAFETY: I/O privilege guaranteed by `IoPorts::new`.
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags));
        }
        value
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        // SAFETY: I/O privilege guaranteed by `IoPorts::new`.
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }
}

/// Chained 8259 pair
pub struct LegacyPic<P> {
    ports: P,
    config: PicConfig,
    initialized: bool,
    timer_hz: Option<u64>,
}

impl<P: PortIo> LegacyPic<P> {
    pub fn new(ports: P, config: PicConfig) -> Self {
        Self {
            ports,
            config,
            initialized: false,
            timer_hz: None,
        }
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    /// Mask register and bit controlling `irq`
    fn mask_bit(irq: Vector) -> Result<(u16, u8)> {
        match irq.as_u8() {
            line @ 0..=7 => Ok((MASTER_DATA, 1 << line)),
            line @ 8..=15 => Ok((SLAVE_DATA, 1 << (line - 8))),
            _ => Err(ControllerError::InvalidIrq { irq }),
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(ControllerError::NotInitialized)
        }
    }
}

impl<P: PortIo> IntController for LegacyPic<P> {
    fn initialize(&mut self) -> Result<()> {
        self.ports.write_u8(MASTER_COMMAND, ICW1_INIT);
        self.ports.write_u8(SLAVE_COMMAND, ICW1_INIT);

        // ICW2: vector offsets
        self.ports.write_u8(MASTER_DATA, self.config.master_offset);
        self.ports.write_u8(SLAVE_DATA, self.config.slave_offset);

        // ICW3: cascade wiring
        self.ports.write_u8(MASTER_DATA, 1 << CASCADE_LINE);
        self.ports.write_u8(SLAVE_DATA, CASCADE_LINE);

        self.ports.write_u8(MASTER_DATA, ICW4_8086);
        self.ports.write_u8(SLAVE_DATA, ICW4_8086);

        // Everything masked except the cascade
        self.ports.write_u8(MASTER_DATA, !(1 << CASCADE_LINE));
        self.ports.write_u8(SLAVE_DATA, 0xff);

        self.initialized = true;
        log::info!(
            "8259 PIC remapped to vectors {}/{}",
            self.config.master_offset,
            self.config.slave_offset
        );
        Ok(())
    }

    fn enable(&mut self, irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        let (port, bit) = Self::mask_bit(irq)?;
        let mask = self.ports.read_u8(port);
        self.ports.write_u8(port, mask & !bit);
        Ok(())
    }

    fn disable(&mut self, irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        let (port, bit) = Self::mask_bit(irq)?;
        let mask = self.ports.read_u8(port);
        self.ports.write_u8(port, mask | bit);
        Ok(())
    }

    fn clear(&mut self, irq: Vector) -> Result<()> {
        self.ensure_initialized()?;
        let (port, _) = Self::mask_bit(irq)?;

        if port == SLAVE_DATA {
            self.ports.write_u8(SLAVE_COMMAND, OCW2_EOI);
        }
        self.ports.write_u8(MASTER_COMMAND, OCW2_EOI);
        Ok(())
    }

    fn timer_interrupt(&self) -> Vector {
        TIMER_LINE
    }

    fn timer_frequency(&self) -> Option<u64> {
        self.timer_hz
    }

    fn start_timer(&mut self, reference: &mut dyn ReferenceTimer) -> Result<()> {
        self.ensure_initialized()?;
        self.timer_hz = None;

        let interval = reference.interval_ms();
        if interval == 0 {
            return Err(CalibrationError::InvalidInterval.into());
        }

        let hertz = u64::from(1000 / interval);
        if hertz == 0 {
            return Err(CalibrationError::CountOutOfRange { hertz }.into());
        }

        self.enable(TIMER_LINE)?;
        self.timer_hz = Some(hertz);
        log::info!("PIT timer on IRQ 0 at {} Hz", hertz);
        Ok(())
    }
}
