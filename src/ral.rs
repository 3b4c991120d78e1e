//! Register access layer
//!
//! Re-exports the `ral-registers` macros, and provides the volatile
//! cell that backs every register and DMA descriptor word. The macros
//! work with any `$periph` module that follows the RAL field convention
//! (`offset`, `mask`, and `R` / `W` / `RW` enumerated value modules).
//!
//! It also resolves the register blocks that a [`Peripherals`](crate::Peripherals)
//! implementation points at.

pub use ral_registers::{modify_reg, read_reg, write_reg};

use core::cell::UnsafeCell;

use crate::udc;

/// Volatile cell that conforms to the RAL's register API
#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}

// Hardware shares these cells with us. All software access happens under
// the controller lock.
unsafe impl<T: Send> Sync for VCell<T> {}

/// The register blocks of one controller instance
pub struct Instances {
    pub udc: &'static udc::RegisterBlock,
    pub glue: &'static udc::GlueRegisterBlock,
}

/// Resolve the register blocks described by `peripherals`
pub fn instances<P: crate::Peripherals>(peripherals: &P) -> Instances {
    // Safety: the Peripherals contract guarantees that these point at the
    // register blocks, and that they live as long as the program.
    unsafe {
        Instances {
            udc: &*peripherals.udc().cast(),
            glue: &*peripherals.glue().cast(),
        }
    }
}
