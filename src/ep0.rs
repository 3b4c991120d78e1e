//! Endpoint 0 control transfers
//!
//! The control endpoint moves through the phases of a control transfer:
//! setup, an optional data stage, and a status stage. The hardware writes
//! each setup packet into a setup descriptor that endpoint 0 holds for as
//! long as it's enabled. The hardware also finishes SET_CONFIGURATION and
//! SET_INTERFACE requests on its own; the driver re-creates those requests
//! for the function layer, and holds the status handshake until the function
//! layer acknowledges them.

use usb_device::UsbDirection;

use crate::{
    chain,
    endpoint::Kind,
    gadget::Event,
    pool::Chain,
    ral,
    udc::{self, ep::EndpointStatus},
    Controller, Error, Peripherals, QueueError, Request, SetupPacket, Status, StatusStage,
};

const OUT: usize = 0;
const IN: usize = 1;

/// Control transfer phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Ep0State {
    /// Waiting for a setup packet
    Idle,
    /// Sending the data stage to the host
    DataIn,
    /// Receiving the data stage from the host
    DataOut,
    /// Sending the zero-length status packet
    StatusIn,
    /// Waiting for the host's zero-length status packet
    StatusOut,
    /// The hardware finished a configuration change, and waits for the
    /// function layer's acknowledgement
    InternalAckPending,
}

pub(crate) struct Ep0 {
    pub(crate) state: Ep0State,
    /// Setup descriptor. Allocated when endpoint 0 is first enabled.
    pub(crate) setup: Option<Chain>,
    /// Identifies the setup packet in flight
    pub(crate) tag: u32,
    /// `wLength` of the setup packet in flight
    length: u16,
    pub(crate) protocol_errors: u32,
}

impl Ep0 {
    pub(crate) fn new() -> Self {
        Ep0 {
            state: Ep0State::Idle,
            setup: None,
            tag: 0,
            length: 0,
            protocol_errors: 0,
        }
    }

    /// Forget the setup packet in flight
    pub(crate) fn invalidate(&mut self) {
        self.tag = self.tag.wrapping_add(1);
        self.length = 0;
        self.state = Ep0State::Idle;
    }
}

impl<P: Peripherals> Controller<P> {
    /// Answer the setup event identified by `tag`
    ///
    /// [`poll()`](Controller::poll) calls this for you. An error stalls
    /// endpoint 0. Answers to setup packets that were replaced by a newer
    /// one are ignored.
    pub fn setup_result(&mut self, tag: u32, result: Result<(), Error>) {
        if tag != self.ep0.tag {
            debug!("EP0 STALE SETUP RESULT {} (NOW {})", tag, self.ep0.tag);
            return;
        }
        if let Err(_error) = result {
            debug!("EP0 SETUP REJECTED {:?}", _error);
            if self.ep0.state == Ep0State::InternalAckPending {
                ral::modify_reg!(udc, self.udc, DEVCTL, CSR_DONE: 1);
            }
            self.ep0_stall(Status::Protocol);
            self.ep0_arm_setup();
        }
    }

    /// Configure endpoint 0 after speed enumeration, and wait for the first
    /// setup packet
    pub(crate) fn ep0_enable(&mut self, max_packet: usize) {
        for ep in &mut self.endpoints[..2] {
            ep.configure(self.udc, Kind::Control, max_packet, max_packet);
        }
        if self.ep0.setup.is_none() {
            match self.alloc.alloc(1) {
                Ok(setup) => self.ep0.setup = Some(setup),
                Err(_error) => {
                    warn!("EP0 NO SETUP DESCRIPTOR: {:?}", _error);
                    return;
                }
            }
        }
        if let Some(setup) = &self.ep0.setup {
            let address = self.alloc.address(setup.head());
            self.endpoints[OUT].set_setup_descriptor(self.udc, address);
        }
        ral::write_reg!(
            udc,
            &self.udc.ASSOC[0],
            NE,
            EPNUM: 0,
            DIR: DIR_OUT,
            TYPE: Kind::Control as u32,
            MAXPKT: max_packet as u32
        );

        self.ep0.invalidate();
        self.ep0_arm_setup();
        for ep in &mut self.endpoints[..2] {
            ep.clear_nak(self.udc);
        }
        let mask = self.endpoints[OUT].interrupt_bit() | self.endpoints[IN].interrupt_bit();
        self.udc.EPINTMSK.write(self.udc.EPINTMSK.read() & !mask);
        debug!("EP0 ENABLED {}", max_packet);
    }

    /// Let the hardware write the next setup packet
    fn ep0_arm_setup(&mut self) {
        if let Some(setup) = &self.ep0.setup {
            self.alloc.descriptor(setup.head()).arm_setup();
        }
        self.endpoints[OUT].set_receive_ready(self.udc, true);
    }

    /// Abandon the control transfer, and stall endpoint 0
    ///
    /// Requests on endpoint 0 complete with `status`. The next setup packet
    /// clears the stall.
    pub(crate) fn ep0_stall(&mut self, status: Status) {
        self.ep0_abandon(status);
        for ep in &mut self.endpoints[..2] {
            ep.set_stalled(self.udc, true);
        }
        debug!("EP0 STALLED");
    }

    fn ep0_abandon(&mut self, status: Status) {
        self.cancel(OUT, status);
        self.cancel(IN, status);
        self.ep0.state = Ep0State::Idle;
    }

    /// Count and report a control transfer that the host interrupted
    fn ep0_desync(&mut self) {
        warn!("EP0 SETUP DURING {:?}", self.ep0.state);
        self.ep0.protocol_errors = self.ep0.protocol_errors.wrapping_add(1);
        self.ep0.invalidate();
    }

    /// A setup packet landed in the setup descriptor
    fn ep0_setup(&mut self) {
        let Some(setup) = &self.ep0.setup else {
            warn!("EP0 SETUP WITHOUT DESCRIPTOR");
            return;
        };
        let packet = SetupPacket::from_bytes(self.alloc.descriptor(setup.head()).setup_packet());
        self.ep0_arm_setup();

        if self.ep0.state != Ep0State::Idle {
            self.ep0_desync();
            self.ep0_stall(Status::Protocol);
            return;
        }

        for ep in &mut self.endpoints[..2] {
            if ep.is_halted() {
                ep.set_stalled(self.udc, false);
            }
        }
        self.ep0.tag = self.ep0.tag.wrapping_add(1);
        self.ep0.length = packet.length;
        self.ep0.state = match (packet.has_data(), packet.direction()) {
            (true, UsbDirection::In) => Ep0State::DataIn,
            (true, UsbDirection::Out) => Ep0State::DataOut,
            (false, _) => Ep0State::Idle,
        };
        trace!("EP0 SETUP {:?} -> {:?}", packet, self.ep0.state);
        self.events.push(Event::Setup {
            tag: self.ep0.tag,
            setup: packet,
        });
    }

    /// The hardware finished a SET_CONFIGURATION or SET_INTERFACE request
    pub(crate) fn ep0_synthesized(&mut self, packet: SetupPacket) {
        if self.ep0.state != Ep0State::Idle {
            self.ep0_desync();
            self.ep0_abandon(Status::Protocol);
        }
        self.ep0.tag = self.ep0.tag.wrapping_add(1);
        self.ep0.length = 0;
        self.ep0.state = Ep0State::InternalAckPending;
        debug!("EP0 INTERNAL {:?}", packet);
        self.events.push(Event::Setup {
            tag: self.ep0.tag,
            setup: packet,
        });
    }

    /// Use `request` for the current control transfer phase
    pub(crate) fn ep0_queue(&mut self, mut request: Request) -> Result<(), QueueError> {
        if !self.endpoints[OUT].is_enabled() {
            return Err(QueueError::new(Error::InvalidArgument, request));
        }
        request.start();

        let idx = match self.ep0.state {
            Ep0State::DataIn => IN,
            Ep0State::DataOut => OUT,
            Ep0State::Idle | Ep0State::InternalAckPending if request.length() == 0 => {
                if self.ep0.state == Ep0State::InternalAckPending {
                    ral::modify_reg!(udc, self.udc, DEVCTL, CSR_DONE: 1);
                } else {
                    self.endpoints[IN].clear_nak(self.udc);
                }
                trace!("EP0 ACK {:?}", self.ep0.state);
                self.ep0.state = Ep0State::Idle;
                request.finish(Status::Complete);
                self.events.push(Event::Complete {
                    endpoint: self.endpoints[IN].address(),
                    request,
                });
                return Ok(());
            }
            Ep0State::Idle | Ep0State::InternalAckPending => {
                warn!("EP0 {} BYTES WITHOUT A DATA STAGE", request.length());
                self.ep0_stall(Status::Protocol);
                return Err(QueueError::new(Error::Protocol, request));
            }
            Ep0State::StatusIn | Ep0State::StatusOut => {
                return Err(QueueError::new(Error::InvalidState, request));
            }
        };

        let ep = &mut self.endpoints[idx];
        if !ep.queue.is_empty() {
            return Err(QueueError::new(Error::Busy, request));
        }
        let length = request.length().min(self.ep0.length.into());
        let mut request = request.with_length(length);
        // A data stage that's shorter than the host expects, and that ends
        // on a packet boundary, needs a zero-length packet.
        if idx == IN
            && length != 0
            && length < self.ep0.length.into()
            && length % ep.max_packet_len() == 0
        {
            request.set_zero(true);
        }
        ep.queue
            .push(request)
            .map_err(|request| QueueError::new(Error::QueueFull, request))?;
        self.submit(idx);

        if !self.endpoints[idx].is_busy() {
            // The request already completed with NoMemory.
            self.ep0_stall(Status::Protocol);
        }
        Ok(())
    }

    /// Service endpoint 0 IN
    pub(crate) fn ep0_in(&mut self, status: EndpointStatus) {
        if status.contains(EndpointStatus::HOST_ERROR) {
            warn!("EP0 IN BUS ERROR");
            self.ep0_stall(Status::Io);
            return;
        }

        let ep = &mut self.endpoints[IN];
        let Some(chain) = &ep.chain else {
            return;
        };
        let progress = chain::progress(&self.alloc, chain, UsbDirection::In, ep.max_packet_len());
        if !progress.done {
            return;
        }
        if progress.error {
            warn!("EP0 IN DESCRIPTOR ERROR");
            self.ep0_stall(Status::Io);
            return;
        }

        let chain = ep.take_chain(self.udc);
        self.alloc.free(chain);
        match self.ep0.state {
            Ep0State::DataIn => {
                // The request stays queued until the host acknowledges it.
                if let Some(request) = ep.queue.first_mut() {
                    request.set_actual(progress.bytes);
                }
                self.ep0.state = Ep0State::StatusOut;
                self.endpoints[OUT].set_receive_ready(self.udc, true);
                trace!("EP0 DATA IN {} BYTES", progress.bytes);
            }
            Ep0State::StatusIn => {
                self.ep0.state = Ep0State::Idle;
                trace!("EP0 STATUS IN");
            }
            _state => {
                trace!("EP0 IN COMPLETE IN {:?}", _state);
            }
        }
    }

    /// Service endpoint 0 OUT
    pub(crate) fn ep0_out(&mut self, status: EndpointStatus) {
        if status.contains(EndpointStatus::HOST_ERROR) {
            warn!("EP0 OUT BUS ERROR");
            self.ep0_stall(Status::Io);
            self.ep0_arm_setup();
            return;
        }
        if status.contains(EndpointStatus::OUT_DATA) {
            self.ep0_out_data();
        }
        if status.contains(EndpointStatus::OUT_SETUP) {
            self.ep0_setup();
        }
    }

    fn ep0_out_data(&mut self) {
        match self.ep0.state {
            Ep0State::StatusOut => {
                if let Some(mut request) = self.endpoints[IN].pop_request() {
                    request.finish(Status::Complete);
                    self.events.push(Event::Complete {
                        endpoint: self.endpoints[IN].address(),
                        request,
                    });
                }
                self.ep0.state = Ep0State::Idle;
                trace!("EP0 STATUS OUT");
            }
            Ep0State::DataIn => {
                // The host moved on to the status stage early.
                let ep = &mut self.endpoints[IN];
                let max_packet = ep.max_packet_len();
                let bytes = ep.chain.as_ref().map_or(0, |chain| {
                    chain::progress(&self.alloc, chain, UsbDirection::In, max_packet).bytes
                });
                ep.flush(self.udc);
                let chain = ep.take_chain(self.udc);
                self.alloc.free(chain);
                if let Some(mut request) = ep.pop_request() {
                    request.set_actual(bytes);
                    request.finish(Status::Complete);
                    self.events.push(Event::Complete {
                        endpoint: ep.address(),
                        request,
                    });
                }
                self.ep0.state = Ep0State::Idle;
                debug!("EP0 EARLY STATUS OUT AFTER {} BYTES", bytes);
            }
            Ep0State::DataOut => {
                let ep = &mut self.endpoints[OUT];
                let Some(chain) = &ep.chain else {
                    return;
                };
                let progress =
                    chain::progress(&self.alloc, chain, UsbDirection::Out, ep.max_packet_len());
                if !progress.done {
                    return;
                }
                if progress.error {
                    warn!("EP0 OUT DESCRIPTOR ERROR");
                    self.ep0_stall(Status::Io);
                    self.ep0_arm_setup();
                    return;
                }
                let chain = ep.take_chain(self.udc);
                self.alloc.free(chain);
                if let Some(mut request) = ep.pop_request() {
                    request.set_actual(progress.bytes);
                    request.finish(Status::Complete);
                    self.events.push(Event::Complete {
                        endpoint: ep.address(),
                        request,
                    });
                }
                trace!("EP0 DATA OUT {} BYTES", progress.bytes);
                match self.config.status_stage {
                    StatusStage::Automatic => self.ep0.state = Ep0State::Idle,
                    StatusStage::Explicit => self.ep0_status_in(),
                }
            }
            _state => {
                trace!("EP0 OUT DATA IN {:?}", _state);
            }
        }
    }

    /// Send the zero-length status packet that closes a control OUT transfer
    fn ep0_status_in(&mut self) {
        match chain::zero_length(&mut self.alloc) {
            Ok(chain) => {
                let address = self.alloc.address(chain.head());
                self.endpoints[IN].start_transfer(self.udc, chain, address);
                self.ep0.state = Ep0State::StatusIn;
            }
            Err(_error) => {
                warn!("EP0 STATUS IN {:?}", _error);
                self.ep0_stall(Status::Protocol);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::Ep0State;
    use crate::{
        sim::{self, Record},
        udc::ep::EndpointStatus,
        Config, Error, SetupPacket, Status, StatusStage,
    };
    use std::vec::Vec;
    use usb_device::{endpoint::EndpointAddress, UsbDirection};

    fn ep0_in() -> EndpointAddress {
        EndpointAddress::from_parts(0, UsbDirection::In)
    }

    fn ep0_out() -> EndpointAddress {
        EndpointAddress::from_parts(0, UsbDirection::Out)
    }

    const GET_CONFIG_DESCRIPTOR: [u8; 8] = [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xC8, 0x00];
    const SET_ADDRESS: [u8; 8] = [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00];
    const CLASS_OUT: [u8; 8] = [0x21, 0x09, 0x00, 0x02, 0x00, 0x00, 0x40, 0x00];

    #[test]
    fn control_in_200_bytes() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();

        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        assert_eq!(ctrl.ep0_state(), Ep0State::DataIn);
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.records,
            [Record::Setup(SetupPacket::from_bytes(GET_CONFIG_DESCRIPTOR))]
        );

        ctrl.queue(ep0_in(), sim::request(1, 200)).unwrap();
        let lengths: Vec<_> = sim::chain(&ctrl, ep0_in())
            .iter()
            .map(|desc| desc.bytes())
            .collect();
        assert_eq!(lengths, [64, 64, 64, 8]);

        sim::finish_in(&mut ctrl, &sim, ep0_in());
        assert_eq!(ctrl.ep0_state(), Ep0State::StatusOut);
        ctrl.poll(&mut gadget);
        assert_eq!(gadget.completions().count(), 0);

        sim::endpoint_event(&mut ctrl, &sim, ep0_out(), EndpointStatus::OUT_DATA);
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.completions().collect::<Vec<_>>(),
            [(ep0_in(), 1, Status::Complete, 200)]
        );
        // Only the setup descriptor is still held.
        assert_eq!(ctrl.free_descriptors(), ctrl.alloc.capacity() - 1);
    }

    #[test]
    fn short_data_stage_gets_zero_length_packet() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        ctrl.queue(ep0_in(), sim::request(1, 128)).unwrap();
        let lengths: Vec<_> = sim::chain(&ctrl, ep0_in())
            .iter()
            .map(|desc| desc.bytes())
            .collect();
        assert_eq!(lengths, [64, 64, 0]);
    }

    #[test]
    fn data_stage_clamped_to_setup_length() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        ctrl.queue(ep0_in(), sim::request(1, 512)).unwrap();
        assert_eq!(sim::chain(&ctrl, ep0_in()).len(), 4);
    }

    #[test]
    fn no_data_stage() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim::setup(&mut ctrl, &sim, SET_ADDRESS);
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        ctrl.poll(&mut gadget);

        ctrl.queue(ep0_in(), sim::request(1, 0)).unwrap();
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.completions().collect::<Vec<_>>(),
            [(ep0_in(), 1, Status::Complete, 0)]
        );
    }

    #[test]
    fn control_out_automatic_status() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim::setup(&mut ctrl, &sim, CLASS_OUT);
        assert_eq!(ctrl.ep0_state(), Ep0State::DataOut);
        ctrl.poll(&mut gadget);

        ctrl.queue(ep0_out(), sim::request(1, 64)).unwrap();
        sim::receive(&mut ctrl, &sim, ep0_out(), 64);
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.completions().collect::<Vec<_>>(),
            [(ep0_out(), 1, Status::Complete, 64)]
        );
    }

    #[test]
    fn control_out_explicit_status() {
        let config = Config::default().with_status_stage(StatusStage::Explicit);
        let (mut ctrl, sim) = sim::connected(config);
        sim::setup(&mut ctrl, &sim, CLASS_OUT);
        ctrl.queue(ep0_out(), sim::request(1, 64)).unwrap();
        sim::receive(&mut ctrl, &sim, ep0_out(), 64);

        assert_eq!(ctrl.ep0_state(), Ep0State::StatusIn);
        let status: Vec<_> = sim::chain(&ctrl, ep0_in())
            .iter()
            .map(|desc| desc.bytes())
            .collect();
        assert_eq!(status, [0]);

        sim::finish_in(&mut ctrl, &sim, ep0_in());
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        assert_eq!(ctrl.free_descriptors(), ctrl.alloc.capacity() - 1);
    }

    #[test]
    fn setup_during_data_stage() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        ctrl.poll(&mut gadget);
        ctrl.queue(ep0_in(), sim::request(1, 200)).unwrap();
        gadget.records.clear();

        sim::setup(&mut ctrl, &sim, SET_ADDRESS);
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        assert!(ctrl.is_halted(ep0_in()));
        assert!(ctrl.is_halted(ep0_out()));
        assert_eq!(ctrl.protocol_errors(), 1);
        assert_eq!(ctrl.free_descriptors(), ctrl.alloc.capacity() - 1);

        // The interrupted data stage never completes, and the new packet
        // isn't forwarded.
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.completions().collect::<Vec<_>>(),
            [(ep0_in(), 1, Status::Protocol, 0)]
        );
        assert!(!gadget
            .records
            .iter()
            .any(|record| matches!(record, Record::Setup(_))));

        // The host retries; the stall clears.
        sim::setup(&mut ctrl, &sim, SET_ADDRESS);
        assert!(!ctrl.is_halted(ep0_in()));
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.records.last(),
            Some(&Record::Setup(SetupPacket::from_bytes(SET_ADDRESS)))
        );
    }

    #[test]
    fn setup_before_data_stage_queued() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        assert!(ctrl.is_halted(ep0_in()));

        // The first packet's event is stale by now.
        ctrl.poll(&mut gadget);
        assert_eq!(gadget.completions().count(), 0);
        let error = ctrl.queue(ep0_in(), sim::request(1, 18)).unwrap_err();
        assert_eq!(error.error, Error::Protocol);
    }

    #[test]
    fn rejected_setup_stalls() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder {
            reject: true,
            ..Default::default()
        };
        sim::setup(&mut ctrl, &sim, CLASS_OUT);
        sim.udc.OUT[0].CTL.write(0);
        ctrl.poll(&mut gadget);

        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        assert!(ctrl.is_halted(ep0_in()));
        // Ready for the next setup packet.
        assert!(ctrl.endpoints[0].is_receive_ready(sim.udc));
    }

    #[test]
    fn stale_setup_result_ignored() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        sim::setup(&mut ctrl, &sim, SET_ADDRESS);
        let Some(crate::Event::Setup { tag, .. }) = ctrl.pop_event() else {
            panic!("expected a setup event");
        };
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        ctrl.setup_result(tag, Err(Error::InvalidArgument));
        assert_eq!(ctrl.ep0_state(), Ep0State::DataIn);
        assert!(!ctrl.is_halted(ep0_in()));
    }

    #[test]
    fn set_configuration_waits_for_ack() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim.udc.DEVSTS.write(sim.udc.DEVSTS.read() | 1);
        sim::device_event(&mut ctrl, &sim, crate::udc::DeviceInterrupt::SET_CONFIG);
        assert_eq!(ctrl.ep0_state(), Ep0State::InternalAckPending);
        ctrl.poll(&mut gadget);
        assert_eq!(
            gadget.records,
            [Record::Setup(SetupPacket::set_configuration(1))]
        );
        assert_eq!(sim.udc.DEVCTL.read() & (1 << 13), 0);

        ctrl.queue(ep0_in(), sim::request(1, 0)).unwrap();
        assert_eq!(ctrl.ep0_state(), Ep0State::Idle);
        assert_ne!(sim.udc.DEVCTL.read() & (1 << 13), 0);
    }

    #[test]
    fn set_interface_from_device_status() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        let mut gadget = sim::Recorder::default();
        sim.udc.DEVSTS.write((2 << 4) | (1 << 8));
        sim::device_event(&mut ctrl, &sim, crate::udc::DeviceInterrupt::SET_INTERFACE);
        ctrl.poll(&mut gadget);
        assert_eq!(gadget.records, [Record::Setup(SetupPacket::set_interface(2, 1))]);
    }

    #[test]
    fn queue_during_status_stage() {
        let (mut ctrl, sim) = sim::connected(Config::default());
        sim::setup(&mut ctrl, &sim, GET_CONFIG_DESCRIPTOR);
        ctrl.queue(ep0_in(), sim::request(1, 18)).unwrap();
        sim::finish_in(&mut ctrl, &sim, ep0_in());
        assert_eq!(ctrl.ep0_state(), Ep0State::StatusOut);
        let error = ctrl.queue(ep0_in(), sim::request(2, 0)).unwrap_err();
        assert_eq!(error.error, Error::InvalidState);
    }
}
