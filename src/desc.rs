//! DMA buffer descriptors
//!
//! The module implements a RAL-compatible interface for working
//! with the controller's buffer descriptors. A data descriptor describes
//! one contiguous buffer fragment, and links to the next descriptor by its
//! device address. The setup descriptor has the same size, but the
//! controller deposits the 8-byte setup packet in the last two words.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::ral::{self, VCell};

#[repr(C, align(16))]
pub struct Descriptor {
    pub STATUS: VCell<u32>,
    _reserved: u32,
    /// Device address of the buffer fragment. Setup descriptor: bytes 0..4.
    pub BUFPTR: VCell<u32>,
    /// Device address of the next descriptor. Setup descriptor: bytes 4..8.
    pub NEXT: VCell<u32>,
}

/// Descriptor ownership, as tracked by the buffer status field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Ownership {
    /// Software handed the descriptor to the controller
    HostReady,
    /// The controller is moving data for this descriptor
    DmaBusy,
    /// The controller is finished with this descriptor
    DmaDone,
    /// Software is preparing this descriptor
    HostBusy,
}

impl Descriptor {
    pub const fn new() -> Self {
        Descriptor {
            STATUS: VCell::new(0),
            _reserved: 0,
            BUFPTR: VCell::new(0),
            NEXT: VCell::new(0),
        }
    }

    /// Put the descriptor back into its allocation state
    ///
    /// Host ready, no buffer, no bytes, not last.
    pub fn reset(&self) {
        ral::write_reg!(crate::desc, self, STATUS, BS: BS_HOST_READY);
        self.BUFPTR.write(0);
        self.NEXT.write(0);
    }

    pub fn ownership(&self) -> Ownership {
        match ral::read_reg!(crate::desc, self, STATUS, BS) {
            STATUS::BS::RW::BS_HOST_READY => Ownership::HostReady,
            STATUS::BS::RW::BS_DMA_BUSY => Ownership::DmaBusy,
            STATUS::BS::RW::BS_DMA_DONE => Ownership::DmaDone,
            _ => Ownership::HostBusy,
        }
    }

    pub fn set_ownership(&self, ownership: Ownership) {
        let bs = match ownership {
            Ownership::HostReady => STATUS::BS::RW::BS_HOST_READY,
            Ownership::DmaBusy => STATUS::BS::RW::BS_DMA_BUSY,
            Ownership::DmaDone => STATUS::BS::RW::BS_DMA_DONE,
            Ownership::HostBusy => STATUS::BS::RW::BS_HOST_BUSY,
        };
        ral::modify_reg!(crate::desc, self, STATUS, BS: bs);
    }

    /// Indicates if this descriptor closes its chain
    pub fn is_last(&self) -> bool {
        ral::read_reg!(crate::desc, self, STATUS, L == 1)
    }

    pub fn set_last(&self, last: bool) {
        ral::modify_reg!(crate::desc, self, STATUS, L: last as u32);
    }

    /// The byte count field
    ///
    /// While software owns the descriptor, this is the fragment length.
    /// Once the controller takes it, the controller rewrites the field with
    /// the bytes it has moved so far: a running count while
    /// [`DmaBusy`](Ownership::DmaBusy), the final count once
    /// [`DmaDone`](Ownership::DmaDone).
    pub fn bytes(&self) -> usize {
        ral::read_reg!(crate::desc, self, STATUS, BYTES) as usize
    }

    pub fn set_bytes(&self, bytes: usize) {
        ral::modify_reg!(crate::desc, self, STATUS, BYTES: bytes as u32);
    }

    /// Indicates if the controller flagged a descriptor or buffer error
    pub fn has_error(&self) -> bool {
        ral::read_reg!(crate::desc, self, STATUS, XSTS != XSTS_SUCCESS)
    }

    pub fn set_buffer(&self, addr: u32) {
        self.BUFPTR.write(addr);
    }

    pub fn set_next(&self, addr: u32) {
        self.NEXT.write(addr);
    }

    pub fn next(&self) -> u32 {
        self.NEXT.read()
    }

    /// Read the setup packet deposited in a setup descriptor
    pub fn setup_packet(&self) -> [u8; 8] {
        let mut packet = [0; 8];
        packet[..4].copy_from_slice(&self.BUFPTR.read().to_le_bytes());
        packet[4..].copy_from_slice(&self.NEXT.read().to_le_bytes());
        packet
    }

    /// Hand a setup descriptor back to the controller for the next packet
    pub fn arm_setup(&self) {
        ral::write_reg!(crate::desc, self, STATUS, BS: BS_HOST_READY);
    }
}

pub mod STATUS {
    /// Buffer status
    pub mod BS {
        pub const offset: u32 = 30;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {
            pub const BS_HOST_READY: u32 = 0;
            pub const BS_DMA_BUSY: u32 = 1;
            pub const BS_DMA_DONE: u32 = 2;
            pub const BS_HOST_BUSY: u32 = 3;
        }
        pub mod R {}
        pub mod W {}
    }
    /// Receive / transmit status
    pub mod XSTS {
        pub const offset: u32 = 28;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {
            pub const XSTS_SUCCESS: u32 = 0;
            pub const XSTS_DESC_ERROR: u32 = 1;
            pub const XSTS_BUF_ERROR: u32 = 3;
        }
        pub mod R {}
        pub mod W {}
    }
    /// Last descriptor in the chain
    pub mod L {
        pub const offset: u32 = 27;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod BYTES {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

const _: [(); 1] = [(); (core::mem::size_of::<Descriptor>() == 16) as usize];

#[cfg(test)]
mod test {
    use super::{Descriptor, Ownership};
    use crate::ral;

    #[test]
    fn ownership() {
        let desc = Descriptor::new();
        assert_eq!(desc.ownership(), Ownership::HostReady);
        desc.set_ownership(Ownership::DmaDone);
        assert_eq!(desc.STATUS.read(), 2 << 30);
        assert_eq!(desc.ownership(), Ownership::DmaDone);
        desc.set_ownership(Ownership::HostBusy);
        assert_eq!(desc.ownership(), Ownership::HostBusy);
    }

    #[test]
    fn last() {
        let desc = Descriptor::new();
        desc.set_last(true);
        assert_eq!(desc.STATUS.read(), 1 << 27);
        assert!(desc.is_last());
    }

    #[test]
    fn bytes() {
        let desc = Descriptor::new();
        desc.set_bytes(u32::MAX as usize);
        assert_eq!(desc.STATUS.read(), 0xFFFF);
        desc.set_bytes(64);
        assert_eq!(desc.bytes(), 64);
    }

    #[test]
    fn error() {
        let desc = Descriptor::new();
        assert!(!desc.has_error());
        ral::modify_reg!(super, &desc, STATUS, XSTS: XSTS_BUF_ERROR);
        assert!(desc.has_error());
    }

    #[test]
    fn reset() {
        let desc = Descriptor::new();
        desc.set_ownership(Ownership::DmaDone);
        desc.set_last(true);
        desc.set_bytes(8);
        desc.set_buffer(0x2000_0000);
        desc.set_next(0x2000_0010);
        desc.reset();
        assert_eq!(desc.STATUS.read(), 0);
        assert_eq!(desc.BUFPTR.read(), 0);
        assert_eq!(desc.next(), 0);
    }

    #[test]
    fn setup_packet() {
        let desc = Descriptor::new();
        desc.BUFPTR.write(u32::from_le_bytes([0x80, 0x06, 0x00, 0x01]));
        desc.NEXT.write(u32::from_le_bytes([0x00, 0x00, 0x12, 0x00]));
        assert_eq!(
            desc.setup_packet(),
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]
        );
    }
}
