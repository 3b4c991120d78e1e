use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use heapless::Vec;

use crate::{
    pool::Chain,
    ral,
    udc::{ep, ep::EndpointStatus, EndpointRegisters, RegisterBlock},
    Request,
};

/// Requests that may wait on one endpoint direction
pub const QUEUE_DEPTH: usize = 8;

/// Endpoint transfer type, as the controller encodes it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
#[repr(u32)]
pub enum Kind {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl From<EndpointType> for Kind {
    fn from(kind: EndpointType) -> Self {
        match kind {
            EndpointType::Control => Kind::Control,
            EndpointType::Isochronous { .. } => Kind::Isochronous,
            EndpointType::Bulk => Kind::Bulk,
            EndpointType::Interrupt => Kind::Interrupt,
        }
    }
}

/// How to configure an endpoint with [`enable_endpoint()`](crate::Controller::enable_endpoint)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct EndpointConfig {
    pub kind: Kind,
    pub max_packet_size: u16,
    /// FIFO size, in bytes. Defaults to the max packet size.
    pub fifo_size: Option<u16>,
}

impl EndpointConfig {
    pub fn new(kind: impl Into<Kind>, max_packet_size: u16) -> Self {
        EndpointConfig {
            kind: kind.into(),
            max_packet_size,
            fifo_size: None,
        }
    }

    pub fn with_fifo_size(mut self, fifo_size: u16) -> Self {
        self.fifo_size = Some(fifo_size);
        self
    }
}

/// Produces an index into the endpoint collection
pub fn index(addr: EndpointAddress) -> usize {
    (addr.index() * 2) + (UsbDirection::In == addr.direction()) as usize
}

/// A USB endpoint
///
/// Holds the queue of requests waiting on one endpoint direction, and the
/// descriptor chain that the controller is working on, if any.
pub struct Endpoint {
    address: EndpointAddress,
    kind: Kind,
    max_packet_len: usize,
    fifo_size: usize,
    enabled: bool,
    halted: bool,
    pub(crate) queue: Vec<Request, QUEUE_DEPTH>,
    /// The chain that the controller owns. Only the head request is ever
    /// mapped.
    pub(crate) chain: Option<Chain>,
    /// Bytes seen by the last recovery tick, while the chain looked stuck
    pub(crate) watch: Option<usize>,
}

impl Endpoint {
    pub fn new(address: EndpointAddress) -> Self {
        Endpoint {
            address,
            kind: Kind::Bulk,
            max_packet_len: 0,
            fifo_size: 0,
            enabled: false,
            halted: false,
            queue: Vec::new(),
            chain: None,
            watch: None,
        }
    }

    /// Returns the endpoint address
    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the maximum packet length supported by this endpoint
    pub fn max_packet_len(&self) -> usize {
        self.max_packet_len
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Take the head request out of the queue
    pub(crate) fn pop_request(&mut self) -> Option<Request> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    /// Indicates if the controller owns a chain for this endpoint
    pub fn is_busy(&self) -> bool {
        self.chain.is_some()
    }

    /// This endpoint's bit in the endpoint interrupt registers
    pub fn interrupt_bit(&self) -> u32 {
        let shift = match self.address.direction() {
            UsbDirection::In => ep_int::IN,
            UsbDirection::Out => ep_int::OUT,
        };
        1 << (shift + self.address.index() as u32)
    }

    fn registers<'a>(&self, udc: &'a RegisterBlock) -> &'a EndpointRegisters {
        match self.address.direction() {
            UsbDirection::In => &udc.IN[self.address.index()],
            UsbDirection::Out => &udc.OUT[self.address.index()],
        }
    }

    /// Configure the endpoint, and leave it NAKing until there's a request
    pub fn configure(&mut self, udc: &RegisterBlock, kind: Kind, max_packet_len: usize, fifo_size: usize) {
        self.kind = kind;
        self.max_packet_len = max_packet_len;
        self.fifo_size = fifo_size.max(max_packet_len);
        self.enabled = true;
        self.halted = false;
        self.watch = None;

        let regs = self.registers(udc);
        let fifo_words = self.fifo_size.div_ceil(4) as u32;
        ral::write_reg!(ep, regs, CTL, ET: kind as u32, SNAK: 1);
        match self.address.direction() {
            UsbDirection::In => {
                ral::write_reg!(ep, regs, BUFSIZE, BUFSIZE: fifo_words);
                ral::write_reg!(ep, regs, MAXPKT, MAX_PKT: max_packet_len as u32);
            }
            UsbDirection::Out => {
                ral::write_reg!(ep, regs, MAXPKT, MAX_PKT: max_packet_len as u32, OUT_BUFSIZE: fifo_words);
            }
        }
        regs.DESPTR.write(0);
        regs.STS.write(EndpointStatus::all().bits());
    }

    /// Forget the configuration, and leave the endpoint NAKing
    pub fn deconfigure(&mut self, udc: &RegisterBlock) {
        self.enabled = false;
        self.halted = false;
        self.watch = None;
        let regs = self.registers(udc);
        ral::write_reg!(ep, regs, CTL, SNAK: 1);
        regs.DESPTR.write(0);
    }

    /// Stall or unstall the endpoint
    pub fn set_stalled(&mut self, udc: &RegisterBlock, stall: bool) {
        self.halted = stall;
        let regs = self.registers(udc);
        if stall {
            ral::modify_reg!(ep, regs, CTL, S: 1);
        } else {
            ral::modify_reg!(ep, regs, CTL, S: 0, CNAK: 1);
        }
    }

    /// Indicates if the stall bit is set in hardware
    pub fn is_stalled(&self, udc: &RegisterBlock) -> bool {
        ral::read_reg!(ep, self.registers(udc), CTL, S == 1)
    }

    /// Clear the NAK condition for this endpoint
    pub fn clear_nak(&mut self, udc: &RegisterBlock) {
        ral::modify_reg!(ep, self.registers(udc), CTL, SNAK: 0, CNAK: 1);
    }

    /// NAK everything the host sends or asks for
    pub fn set_nak(&mut self, udc: &RegisterBlock) {
        ral::modify_reg!(ep, self.registers(udc), CTL, CNAK: 0, SNAK: 1);
    }

    /// Allow (or stop) the controller from depositing OUT data
    pub fn set_receive_ready(&mut self, udc: &RegisterBlock, ready: bool) {
        ral::modify_reg!(ep, self.registers(udc), CTL, RRDY: ready as u32);
    }

    pub fn is_receive_ready(&self, udc: &RegisterBlock) -> bool {
        ral::read_reg!(ep, self.registers(udc), CTL, RRDY == 1)
    }

    /// Drop whatever sits in the endpoint's TX FIFO
    pub fn flush(&mut self, udc: &RegisterBlock) {
        if self.address.direction() == UsbDirection::In {
            let regs = self.registers(udc);
            ral::modify_reg!(ep, regs, CTL, F: 1);
            ral::modify_reg!(ep, regs, CTL, F: 0);
        }
    }

    /// Hand a chain to the controller, and let it move data
    ///
    /// IN endpoints get a poll demand. OUT endpoints become receive ready
    /// once the first descriptor is armed.
    pub fn start_transfer(&mut self, udc: &RegisterBlock, chain: Chain, address: u32) {
        self.chain = Some(chain);
        self.watch = None;
        let regs = self.registers(udc);
        regs.DESPTR.write(address);
        self.clear_nak(udc);
        match self.address.direction() {
            UsbDirection::In => ral::modify_reg!(ep, regs, CTL, P: 1),
            UsbDirection::Out => ral::modify_reg!(ep, regs, CTL, RRDY: 1),
        }
    }

    /// Take the chain back from the controller
    ///
    /// OUT endpoints stop accepting data until the next transfer starts.
    pub fn take_chain(&mut self, udc: &RegisterBlock) -> Option<Chain> {
        self.watch = None;
        let chain = self.chain.take()?;
        let regs = self.registers(udc);
        regs.DESPTR.write(0);
        if self.address.direction() == UsbDirection::Out && self.address.index() != 0 {
            ral::modify_reg!(ep, regs, CTL, RRDY: 0);
        }
        Some(chain)
    }

    /// Point an OUT endpoint at its setup descriptor
    pub fn set_setup_descriptor(&mut self, udc: &RegisterBlock, address: u32) {
        self.registers(udc).SUBPTR.write(address);
    }

    pub fn status(&self, udc: &RegisterBlock) -> EndpointStatus {
        EndpointStatus::from_bits_truncate(self.registers(udc).STS.read())
    }

    pub fn clear_status(&mut self, udc: &RegisterBlock, status: EndpointStatus) {
        self.registers(udc).STS.write(status.bits());
    }
}

/// Shifts into the endpoint interrupt registers
mod ep_int {
    use crate::udc::EPINT;
    pub const IN: u32 = EPINT::IN::offset;
    pub const OUT: u32 = EPINT::OUT::offset;
}

#[cfg(test)]
mod tests {
    use super::{index, Endpoint, Kind};
    use crate::udc::{ep::EndpointStatus, RegisterBlock};
    use usb_device::{endpoint::EndpointAddress, UsbDirection};

    #[test]
    fn indices() {
        assert_eq!(index(EndpointAddress::from_parts(0, UsbDirection::Out)), 0);
        assert_eq!(index(EndpointAddress::from_parts(0, UsbDirection::In)), 1);
        assert_eq!(index(EndpointAddress::from_parts(3, UsbDirection::In)), 7);
    }

    #[test]
    fn interrupt_bits() {
        let ep = Endpoint::new(EndpointAddress::from_parts(2, UsbDirection::In));
        assert_eq!(ep.interrupt_bit(), 1 << 2);
        let ep = Endpoint::new(EndpointAddress::from_parts(2, UsbDirection::Out));
        assert_eq!(ep.interrupt_bit(), 1 << 18);
    }

    #[test]
    fn configure_in() {
        let udc = RegisterBlock::new();
        let mut ep = Endpoint::new(EndpointAddress::from_parts(1, UsbDirection::In));
        ep.configure(&udc, Kind::Bulk, 512, 0);
        assert!(ep.is_enabled());
        assert_eq!(udc.IN[1].CTL.read(), (2 << 4) | (1 << 7));
        assert_eq!(udc.IN[1].BUFSIZE.read(), 128);
        assert_eq!(udc.IN[1].MAXPKT.read(), 512);
    }

    #[test]
    fn stall() {
        let udc = RegisterBlock::new();
        let mut ep = Endpoint::new(EndpointAddress::from_parts(1, UsbDirection::Out));
        ep.configure(&udc, Kind::Interrupt, 64, 64);
        ep.set_stalled(&udc, true);
        assert!(ep.is_halted());
        assert!(ep.is_stalled(&udc));
        ep.set_stalled(&udc, false);
        assert!(!ep.is_stalled(&udc));
        assert!(!ep.is_halted());
    }

    #[test]
    fn status() {
        let udc = RegisterBlock::new();
        let ep = Endpoint::new(EndpointAddress::from_parts(0, UsbDirection::Out));
        udc.OUT[0].STS.write((1 << 5) | (1 << 31));
        assert_eq!(ep.status(&udc), EndpointStatus::OUT_SETUP);
    }
}
