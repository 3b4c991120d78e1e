//! Interrupt dispatch
//!
//! One interrupt line carries three sources, each with its own status
//! register: plug detect in the glue block, device events, and endpoint
//! events. [`Controller::on_interrupt`] services them in that order, then
//! the recovery timer.

use usb_device::UsbDirection;

use crate::{
    chain,
    ep0::Ep0State,
    lifecycle::State,
    ral,
    udc::{self, DeviceInterrupt, GlueInterrupt},
    Controller, Peripherals, SetupPacket, Speed, Status,
};

/// The outcome of [`Controller::on_interrupt`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum IrqResult {
    /// The controller serviced at least one source
    Handled,
    /// No unmasked source was pending. The interrupt belongs to someone
    /// else on a shared line.
    NotHandled,
}

impl<P: Peripherals> Controller<P> {
    /// Service the controller's interrupt
    ///
    /// Call this from the USB interrupt handler. Events for the function
    /// layer queue up for the next [`poll()`](Controller::poll).
    pub fn on_interrupt(&mut self) -> IrqResult {
        let glue = GlueInterrupt::from_bits_truncate(
            self.glue.GLUEINT.read() & self.glue.GLUEINTEN.read(),
        );
        let device =
            DeviceInterrupt::from_bits_truncate(self.udc.DEVINT.read() & !self.udc.DEVINTMSK.read());
        let endpoints = self.udc.EPINT.read() & !self.udc.EPINTMSK.read();

        if glue.is_empty() && device.is_empty() && endpoints == 0 {
            return IrqResult::NotHandled;
        }

        if glue.contains(GlueInterrupt::PLUG) {
            ral::write_reg!(udc, self.glue, GLUEINT, PLUG: 1);
            self.on_plug();
        }

        if !device.is_empty() {
            self.udc.DEVINT.write(device.bits());
            if matches!(self.state, State::Connected(_) | State::Suspended) {
                self.on_device(device);
            } else {
                debug!("DEVICE {:?} OFF THE BUS", device);
            }
        }

        // A bus reset may have masked endpoints while handling device events.
        let endpoints = endpoints & !self.udc.EPINTMSK.read();
        if endpoints != 0 {
            self.udc.EPINT.write(endpoints);
            self.on_endpoints(endpoints);
        }

        if glue.contains(GlueInterrupt::TIMER) {
            self.timer().clear_elapsed();
            self.on_timer();
        }

        IrqResult::Handled
    }

    fn on_device(&mut self, device: DeviceInterrupt) {
        trace!("DEVICE {:?}", device);
        if device.contains(DeviceInterrupt::RESET) {
            self.on_bus_reset();
        }
        if device.contains(DeviceInterrupt::ENUM_DONE) {
            self.on_enumerated();
        }
        if device.contains(DeviceInterrupt::SET_CONFIG) {
            let configuration = ral::read_reg!(udc, self.udc, DEVSTS, CFG);
            self.ep0_synthesized(SetupPacket::set_configuration(configuration as u8));
        }
        if device.contains(DeviceInterrupt::SET_INTERFACE) {
            let (interface, alternate) = ral::read_reg!(udc, self.udc, DEVSTS, INTF, ALT);
            self.ep0_synthesized(SetupPacket::set_interface(interface as u8, alternate as u8));
        }
        if device.contains(DeviceInterrupt::SUSPEND) {
            self.suspend();
        }
        if device.contains(DeviceInterrupt::RESUME) {
            self.resume();
        }
    }

    /// The host reset the bus
    fn on_bus_reset(&mut self) {
        debug!("BUS RESET");
        self.udc.EPINTMSK.write(u32::MAX);
        self.stop_activity();
        self.state = State::Connected(Speed::Unknown);
        self.configure_speed();
        self.park_phy();
    }

    /// Speed enumeration finished; endpoint 0 can start
    fn on_enumerated(&mut self) {
        let speed = match ral::read_reg!(udc, self.udc, DEVSTS, ENUM_SPD) {
            udc::DEVSTS::ENUM_SPD::RW::ENUM_SPD_HS => Speed::High,
            udc::DEVSTS::ENUM_SPD::RW::ENUM_SPD_LS => Speed::Low,
            _ => Speed::Full,
        };
        info!("ENUMERATED {:?}", speed);
        self.speed = speed;
        self.state = State::Connected(speed);
        self.ep0_enable(if speed == Speed::Low { 8 } else { 64 });
        ral::modify_reg!(udc, self.udc, DEVCTL, RDE: 1, TDE: 1, MODE: 1);
    }

    fn on_endpoints(&mut self, bits: u32) {
        let order = match self.ep0.state {
            Ep0State::DataIn | Ep0State::StatusIn => [1, 0],
            _ => [0, 1],
        };
        for idx in order {
            let ep = &mut self.endpoints[idx];
            if bits & ep.interrupt_bit() == 0 {
                continue;
            }
            let status = ep.status(self.udc);
            ep.clear_status(self.udc, status);
            match ep.address().direction() {
                UsbDirection::Out => self.ep0_out(status),
                UsbDirection::In => self.ep0_in(status),
            }
        }

        for idx in 2..self.config.endpoints * 2 {
            if bits & self.endpoints[idx].interrupt_bit() != 0 {
                self.on_endpoint(idx);
            }
        }
    }

    /// Retire the head request of a non-control endpoint, if the controller
    /// is done with it
    fn on_endpoint(&mut self, idx: usize) {
        let ep = &mut self.endpoints[idx];
        let status = ep.status(self.udc);
        ep.clear_status(self.udc, status);
        let Some(chain) = &ep.chain else {
            trace!("EP{} {:?} IDLE {:?}", ep.address().index(), ep.address().direction(), status);
            return;
        };

        let progress =
            chain::progress(&self.alloc, chain, ep.address().direction(), ep.max_packet_len());
        if status.contains(udc::ep::EndpointStatus::HOST_ERROR) || progress.error {
            warn!(
                "EP{} {:?} BUS ERROR {:?}",
                ep.address().index(),
                ep.address().direction(),
                status
            );
            self.retire(idx, progress.bytes, Status::Io);
        } else if progress.done {
            self.retire(idx, progress.bytes, Status::Complete);
        }
    }
}
