//! A simulated controller, for tests
//!
//! Register blocks live on the heap. Helpers play the hardware's role:
//! they complete descriptors, raise interrupt status, call the interrupt
//! handler, then clear the status that the handler acknowledged.

extern crate std;

use std::{boxed::Box, vec, vec::Vec};

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    desc::{Descriptor, Ownership},
    endpoint,
    udc::{ep::EndpointStatus, DeviceInterrupt, GlueInterrupt, GlueRegisterBlock, RegisterBlock},
    Config, Controller, DescriptorPool, Error, Gadget, Peripherals, Request, SetupPacket, Speed,
    Status,
};

#[derive(Clone, Copy)]
pub struct Sim {
    pub udc: &'static RegisterBlock,
    pub glue: &'static GlueRegisterBlock,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            udc: Box::leak(Box::new(RegisterBlock::new())),
            glue: Box::leak(Box::new(GlueRegisterBlock::new())),
        }
    }
}

unsafe impl Peripherals for Sim {
    fn udc(&self) -> *const () {
        (self.udc as *const RegisterBlock).cast()
    }
    fn glue(&self) -> *const () {
        (self.glue as *const GlueRegisterBlock).cast()
    }
}

pub type Ctrl = Controller<Sim>;

/// Probe a controller with a 64 descriptor pool
pub fn probe(config: Config) -> (Ctrl, Sim) {
    probe_with_pool::<64>(config)
}

pub fn probe_with_pool<const N: usize>(config: Config) -> (Ctrl, Sim) {
    let sim = Sim::new();
    let pool: &'static DescriptorPool<N> = Box::leak(Box::new(DescriptorPool::new()));
    let ctrl = Controller::probe(sim, pool, config).unwrap();
    settle(&sim);
    (ctrl, sim)
}

/// Probe, attach, enable, and enumerate at high speed
pub fn connected(config: Config) -> (Ctrl, Sim) {
    connected_with_pool::<64>(config)
}

pub fn connected_with_pool<const N: usize>(config: Config) -> (Ctrl, Sim) {
    let (mut ctrl, sim) = probe_with_pool::<N>(config);
    attach(&mut ctrl, &sim);
    ctrl.enable();
    enumerate(&mut ctrl, &sim, Speed::High);
    (ctrl, sim)
}

/// Clear everything that the interrupt handler acknowledged
pub fn settle(sim: &Sim) {
    sim.udc.DEVINT.write(0);
    sim.udc.EPINT.write(0);
    sim.glue.GLUEINT.write(0);
    for regs in sim.udc.IN.iter().chain(&sim.udc.OUT) {
        regs.STS.write(0);
    }
}

pub fn attach(ctrl: &mut Ctrl, sim: &Sim) {
    sim.glue.PLUGSTS.write(1);
    sim.glue.GLUEINT.write(GlueInterrupt::PLUG.bits());
    interrupt(ctrl, sim);
}

pub fn detach(ctrl: &mut Ctrl, sim: &Sim) {
    sim.glue.PLUGSTS.write(0);
    sim.glue.GLUEINT.write(GlueInterrupt::PLUG.bits());
    interrupt(ctrl, sim);
}

/// Elapse the recovery timer
pub fn tick(ctrl: &mut Ctrl, sim: &Sim) {
    sim.glue.GLUEINT.write(GlueInterrupt::TIMER.bits());
    interrupt(ctrl, sim);
}

pub fn device_event(ctrl: &mut Ctrl, sim: &Sim, event: DeviceInterrupt) {
    sim.udc.DEVINT.write(event.bits());
    interrupt(ctrl, sim);
}

/// Bus reset, then speed enumeration
pub fn enumerate(ctrl: &mut Ctrl, sim: &Sim, speed: Speed) {
    device_event(ctrl, sim, DeviceInterrupt::RESET);
    let enum_spd = match speed {
        Speed::High => 0,
        Speed::Low => 2,
        _ => 1,
    };
    let devsts = sim.udc.DEVSTS.read() & !(0b11 << 13);
    sim.udc.DEVSTS.write(devsts | (enum_spd << 13));
    device_event(ctrl, sim, DeviceInterrupt::ENUM_DONE);
}

/// Raise `status` on an endpoint, without interrupting
///
/// Register memory can't emulate write-one-to-clear. Status left over from
/// the driver's own writes never reached the interrupt register, so it's
/// treated as acknowledged.
pub fn raise(sim: &Sim, addr: EndpointAddress, status: EndpointStatus) {
    let (regs, bit) = match addr.direction() {
        UsbDirection::In => (&sim.udc.IN[addr.index()], 1 << addr.index()),
        UsbDirection::Out => (&sim.udc.OUT[addr.index()], 1 << (16 + addr.index())),
    };
    let epint = sim.udc.EPINT.read();
    let pending = if epint & bit != 0 { regs.STS.read() } else { 0 };
    regs.STS.write(pending | status.bits());
    sim.udc.EPINT.write(epint | bit);
}

/// Raise `status` on an endpoint, and interrupt
pub fn endpoint_event(ctrl: &mut Ctrl, sim: &Sim, addr: EndpointAddress, status: EndpointStatus) {
    raise(sim, addr, status);
    interrupt(ctrl, sim);
}

/// Run the interrupt handler on whatever the test raised
pub fn interrupt(ctrl: &mut Ctrl, sim: &Sim) {
    ctrl.on_interrupt();
    settle(sim);
}

/// The descriptors of the chain that `addr` is working on
pub fn chain(ctrl: &Ctrl, addr: EndpointAddress) -> Vec<&'static Descriptor> {
    match &ctrl.endpoints[endpoint::index(addr)].chain {
        Some(chain) => ctrl.alloc.iter(chain).collect(),
        None => Vec::new(),
    }
}

/// Deliver a setup packet on endpoint 0
pub fn setup(ctrl: &mut Ctrl, sim: &Sim, packet: [u8; 8]) {
    deposit_setup(ctrl, packet);
    let ep0 = EndpointAddress::from_parts(0, UsbDirection::Out);
    endpoint_event(ctrl, sim, ep0, EndpointStatus::OUT_SETUP);
}

/// Write a setup packet into the setup descriptor, without signaling it
pub fn deposit_setup(ctrl: &Ctrl, packet: [u8; 8]) {
    let setup = ctrl.ep0.setup.as_ref().unwrap();
    let desc = ctrl.alloc.descriptor(setup.head());
    desc.BUFPTR
        .write(u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]));
    desc.NEXT
        .write(u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]));
    desc.set_ownership(Ownership::DmaDone);
}

/// Send every descriptor of an IN chain
pub fn finish_in(ctrl: &mut Ctrl, sim: &Sim, addr: EndpointAddress) {
    send_in(ctrl, addr);
    endpoint_event(ctrl, sim, addr, EndpointStatus::TDC);
}

/// Mark every descriptor of an IN chain as sent, without signaling it
pub fn send_in(ctrl: &Ctrl, addr: EndpointAddress) {
    for desc in chain(ctrl, addr) {
        desc.set_ownership(Ownership::DmaDone);
    }
}

/// Receive `len` bytes into an OUT chain, in max packet size pieces
pub fn receive(ctrl: &mut Ctrl, sim: &Sim, addr: EndpointAddress, len: usize) {
    let max_packet = ctrl.endpoints[endpoint::index(addr)].max_packet_len();
    let mut remaining = len;
    for desc in chain(ctrl, addr) {
        let bytes = remaining.min(max_packet);
        desc.set_bytes(bytes);
        desc.set_ownership(Ownership::DmaDone);
        remaining -= bytes;
        if bytes < max_packet {
            break;
        }
    }
    endpoint_event(ctrl, sim, addr, EndpointStatus::OUT_DATA);
}

/// Fill the first descriptors of an OUT chain with `done` bytes each, and
/// leave the next one in progress with `busy` bytes. Nothing is signaled.
pub fn receive_partial(ctrl: &Ctrl, addr: EndpointAddress, done: &[usize], busy: usize) {
    let descs = chain(ctrl, addr);
    for (desc, bytes) in descs.iter().zip(done) {
        desc.set_bytes(*bytes);
        desc.set_ownership(Ownership::DmaDone);
    }
    if busy > 0 {
        if let Some(desc) = descs.get(done.len()) {
            desc.set_bytes(busy);
            desc.set_ownership(Ownership::DmaBusy);
        }
    }
}

pub fn request(id: u32, len: usize) -> Request {
    Request::new(id, Box::leak(vec![0; len].into_boxed_slice()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Setup(SetupPacket),
    Complete(EndpointAddress, u32, Status, usize),
    Disconnect,
    Suspend,
    Resume,
}

/// A gadget that remembers what it was told
#[derive(Default)]
pub struct Recorder {
    pub records: Vec<Record>,
    /// Refuse every setup packet
    pub reject: bool,
}

impl Recorder {
    /// `(endpoint, id, status, actual)` of each completion
    pub fn completions(&self) -> impl Iterator<Item = (EndpointAddress, u32, Status, usize)> + '_ {
        self.records.iter().filter_map(|record| match *record {
            Record::Complete(endpoint, id, status, actual) => Some((endpoint, id, status, actual)),
            _ => None,
        })
    }
}

impl Gadget for Recorder {
    fn setup(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        self.records.push(Record::Setup(*setup));
        if self.reject {
            Err(Error::InvalidArgument)
        } else {
            Ok(())
        }
    }

    fn complete(&mut self, endpoint: EndpointAddress, request: Request) {
        self.records.push(Record::Complete(
            endpoint,
            request.id(),
            request.status(),
            request.actual(),
        ));
    }

    fn disconnect(&mut self) {
        self.records.push(Record::Disconnect);
    }

    fn suspend(&mut self) {
        self.records.push(Record::Suspend);
    }

    fn resume(&mut self) {
        self.records.push(Record::Resume);
    }
}
