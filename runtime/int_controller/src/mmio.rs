//! Register Access - Memory-mapped register window
//!
//! Controllers never touch raw pointers directly; they go through
//! [`RegisterAccess`], which reads and writes 32-bit registers at byte
//! offsets from a fixed base. [`MmioRegion`] is the hardware implementation
//! over a mapped device page.

use crate::{ControllerError, Result};

/// Width of every controller register in bytes
pub const REGISTER_WIDTH: usize = 4;

/// Read/write access to a window of 32-bit registers
pub trait RegisterAccess {
    /// Read the register at `offset`
    fn read(&self, offset: usize) -> Result<u32>;

    /// Write `value` to the register at `offset`
    fn write(&mut self, offset: usize, value: u32) -> Result<()>;

    /// Set `bits` in the register at `offset`, keeping the others
    fn set(&mut self, offset: usize, bits: u32) -> Result<()> {
        let value = self.read(offset)?;
        self.write(offset, value | bits)
    }

    /// Clear `bits` in the register at `offset`, keeping the others
    fn unset(&mut self, offset: usize, bits: u32) -> Result<()> {
        let value = self.read(offset)?;
        self.write(offset, value & !bits)
    }
}

/// Mapped MMIO register window
///
/// Accesses are volatile. Offsets must be 4-byte aligned and lie within
/// the window; a null base makes every access fail, which is how an unmapped
/// region surfaces to the controller.
pub struct MmioRegion {
    base: usize,
    size: usize,
}

impl MmioRegion {
    /// Create a new MMIO region
    ///
    /// # Safety
    /// `base` must be either zero or the virtual address of a device mapping
    /// at least `size` bytes long that stays mapped for the lifetime of the
    /// region.
    pub unsafe fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Get base address
    pub fn base(&self) -> usize {
        self.base
    }

    /// Get size
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, offset: usize) -> Result<usize> {
        let in_bounds = offset
            .checked_add(REGISTER_WIDTH)
            .is_some_and(|end| end <= self.size);

        if self.base == 0 || !in_bounds || offset % REGISTER_WIDTH != 0 {
            return Err(ControllerError::RegisterAccess { offset });
        }

        Ok(self.base + offset)
    }
}

impl RegisterAccess for MmioRegion {
    fn read(&self, offset: usize) -> Result<u32> {
        let addr = self.check(offset)?;
        // SAFETY: `check` keeps the access aligned and inside the mapping
        // the constructor's caller vouched for.
        Ok(unsafe { core::ptr::read_volatile(addr as *const u32) })
    }

    fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        let addr = self.check(offset)?;
        // SAFETY: as in `read`.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
        Ok(())
    }
}
