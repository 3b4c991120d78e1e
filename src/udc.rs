//! Device controller register blocks
//!
//! The module implements a RAL-compatible interface for the controller's
//! registers. Only the registers and fields that the driver touches are
//! described. Endpoint register sets live in [`ep`]; device-level and glue
//! registers live here.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::ral::VCell;
use bitflags::bitflags;

/// Number of endpoint register sets, per direction, in the register map
pub const REGISTER_SETS: usize = 16;

/// Register set for one endpoint direction
#[repr(C)]
pub struct EndpointRegisters {
    pub CTL: VCell<u32>,
    pub STS: VCell<u32>,
    /// IN: FIFO size, in 32-bit words. OUT: frame number.
    pub BUFSIZE: VCell<u32>,
    pub MAXPKT: VCell<u32>,
    /// Setup descriptor pointer (OUT only)
    pub SUBPTR: VCell<u32>,
    /// Data descriptor pointer
    pub DESPTR: VCell<u32>,
    _reserved: [u32; 2],
}

/// Controller core registers
#[repr(C)]
pub struct RegisterBlock {
    pub IN: [EndpointRegisters; REGISTER_SETS],
    pub OUT: [EndpointRegisters; REGISTER_SETS],
    pub DEVCFG: VCell<u32>,
    pub DEVCTL: VCell<u32>,
    pub DEVSTS: VCell<u32>,
    pub DEVINT: VCell<u32>,
    pub DEVINTMSK: VCell<u32>,
    pub EPINT: VCell<u32>,
    pub EPINTMSK: VCell<u32>,
    _reserved0: [u32; 58],
    /// Endpoint association registers, programmed from the
    /// configuration's descriptor table.
    pub ASSOC: [Association; REGISTER_SETS],
}

/// One endpoint association register
#[repr(transparent)]
pub struct Association {
    pub NE: VCell<u32>,
}

/// Vendor glue around the controller: plug detect, PHY control, and a
/// general purpose timer.
#[repr(C)]
pub struct GlueRegisterBlock {
    pub PHYCTL: VCell<u32>,
    pub PLUGSTS: VCell<u32>,
    pub GLUEINT: VCell<u32>,
    pub GLUEINTEN: VCell<u32>,
    pub TIMERLD: VCell<u32>,
    pub TIMERCTRL: VCell<u32>,
}

const _: [(); 1] = [(); (core::mem::size_of::<EndpointRegisters>() == 0x20) as usize];
const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x544) as usize];

#[cfg(test)]
impl EndpointRegisters {
    fn new() -> Self {
        EndpointRegisters {
            CTL: VCell::new(0),
            STS: VCell::new(0),
            BUFSIZE: VCell::new(0),
            MAXPKT: VCell::new(0),
            SUBPTR: VCell::new(0),
            DESPTR: VCell::new(0),
            _reserved: [0; 2],
        }
    }
}

#[cfg(test)]
impl RegisterBlock {
    /// A zeroed register block, for simulation
    pub fn new() -> Self {
        RegisterBlock {
            IN: core::array::from_fn(|_| EndpointRegisters::new()),
            OUT: core::array::from_fn(|_| EndpointRegisters::new()),
            DEVCFG: VCell::new(0),
            DEVCTL: VCell::new(0),
            DEVSTS: VCell::new(0),
            DEVINT: VCell::new(0),
            DEVINTMSK: VCell::new(0),
            EPINT: VCell::new(0),
            EPINTMSK: VCell::new(0),
            _reserved0: [0; 58],
            ASSOC: core::array::from_fn(|_| Association { NE: VCell::new(0) }),
        }
    }
}

#[cfg(test)]
impl GlueRegisterBlock {
    /// A zeroed glue block, for simulation
    pub const fn new() -> Self {
        GlueRegisterBlock {
            PHYCTL: VCell::new(0),
            PLUGSTS: VCell::new(0),
            GLUEINT: VCell::new(0),
            GLUEINTEN: VCell::new(0),
            TIMERLD: VCell::new(0),
            TIMERCTRL: VCell::new(0),
        }
    }
}

bitflags! {
    /// Device-level interrupt sources
    ///
    /// Shared by `DEVINT` (status, write one to clear) and `DEVINTMSK`
    /// (a set bit masks the source).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceInterrupt : u32 {
        /// The hardware completed a SET_CONFIGURATION request
        const SET_CONFIG = 1 << 0;
        /// The hardware completed a SET_INTERFACE request
        const SET_INTERFACE = 1 << 1;
        const IDLE = 1 << 2;
        const RESET = 1 << 3;
        const SUSPEND = 1 << 4;
        const SOF = 1 << 5;
        /// Speed enumeration done
        const ENUM_DONE = 1 << 6;
        const RESUME = 1 << 7;
    }
}

bitflags! {
    /// Glue interrupt sources, shared by `GLUEINT` and `GLUEINTEN`
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GlueInterrupt : u32 {
        const PLUG = 1 << 0;
        const TIMER = 1 << 1;
    }
}

pub mod DEVCFG {
    pub mod SPD {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {
            pub const SPD_HS: u32 = 0;
            pub const SPD_FS: u32 = 1;
        }
        pub mod R {}
        pub mod W {}
    }
    pub mod RWKP {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod SP {
        pub const offset: u32 = 3;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod CSR_PRG {
        pub const offset: u32 = 17;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod DEVCTL {
    pub mod RDE {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod TDE {
        pub const offset: u32 = 3;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod DU {
        pub const offset: u32 = 4;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod MODE {
        pub const offset: u32 = 9;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod SD {
        pub const offset: u32 = 10;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod CSR_DONE {
        pub const offset: u32 = 13;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod DEVSTS {
    pub mod CFG {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod INTF {
        pub const offset: u32 = 4;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod ALT {
        pub const offset: u32 = 8;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod SUSP {
        pub const offset: u32 = 12;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod ENUM_SPD {
        pub const offset: u32 = 13;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {
            pub const ENUM_SPD_HS: u32 = 0;
            pub const ENUM_SPD_FS: u32 = 1;
            pub const ENUM_SPD_LS: u32 = 2;
        }
        pub mod R {}
        pub mod W {}
    }
}

pub mod EPINT {
    pub mod IN {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod OUT {
        pub const offset: u32 = 16;
        pub const mask: u32 = 0xFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub use EPINT as EPINTMSK;

pub mod NE {
    pub mod EPNUM {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod DIR {
        pub const offset: u32 = 4;
        pub const mask: u32 = 1 << offset;
        pub mod RW {
            pub const DIR_OUT: u32 = 0;
            pub const DIR_IN: u32 = 1;
        }
        pub mod R {}
        pub mod W {}
    }
    pub mod TYPE {
        pub const offset: u32 = 5;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod CFG {
        pub const offset: u32 = 7;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod INTF {
        pub const offset: u32 = 11;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod ALT {
        pub const offset: u32 = 15;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod MAXPKT {
        pub const offset: u32 = 19;
        pub const mask: u32 = 0x7FF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod PHYCTL {
    /// Hold the PHY in reset. Used while no cable is attached.
    pub mod PHY_RESET {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Low-power PHY mode, for bus suspend
    pub mod PHY_SUSPEND {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Non-driving PHY mode, used while attached but not connected
    pub mod PHY_IDLE {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod PLUGSTS {
    pub mod ATTACHED {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod GLUEINT {
    pub mod PLUG {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod TIMER {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub use GLUEINT as GLUEINTEN;

pub mod TIMERLD {
    pub mod LOAD {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFFFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod TIMERCTRL {
    pub mod COUNT {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFFFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod MODE {
        pub const offset: u32 = 24;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod RST {
        pub const offset: u32 = 30;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod RUN {
        pub const offset: u32 = 31;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

/// Endpoint register fields
pub mod ep {
    use bitflags::bitflags;

    pub use super::EndpointRegisters;

    bitflags! {
        /// Endpoint status (`STS`), write one to clear
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct EndpointStatus : u32 {
            /// OUT data was written to a data descriptor
            const OUT_DATA = 1 << 4;
            /// A setup packet was written to the setup descriptor
            const OUT_SETUP = 1 << 5;
            /// IN token received
            const IN = 1 << 6;
            /// Buffer not available
            const BNA = 1 << 7;
            /// Host (AHB) error during DMA
            const HOST_ERROR = 1 << 9;
            /// Transmit DMA complete
            const TDC = 1 << 10;
        }
    }

    pub mod CTL {
        /// Stall
        pub mod S {
            pub const offset: u32 = 0;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        /// Flush the TX FIFO
        pub mod F {
            pub const offset: u32 = 1;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        /// Poll demand
        pub mod P {
            pub const offset: u32 = 3;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        /// Endpoint type
        pub mod ET {
            pub const offset: u32 = 4;
            pub const mask: u32 = 0b11 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        pub mod NAK {
            pub const offset: u32 = 6;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        pub mod SNAK {
            pub const offset: u32 = 7;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        pub mod CNAK {
            pub const offset: u32 = 8;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        /// Receive ready
        pub mod RRDY {
            pub const offset: u32 = 9;
            pub const mask: u32 = 1 << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
    }

    pub mod BUFSIZE {
        pub mod BUFSIZE {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xFFFF << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
    }

    pub mod MAXPKT {
        pub mod MAX_PKT {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xFFFF << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
        /// OUT buffer size, in 32-bit words
        pub mod OUT_BUFSIZE {
            pub const offset: u32 = 16;
            pub const mask: u32 = 0xFFFF << offset;
            pub mod RW {}
            pub mod R {}
            pub mod W {}
        }
    }
}
