//! Controller lifecycle
//!
//! Cable attach and detach, soft connect and disconnect, bus suspend and
//! resume, and the recovery timer that closes stuck OUT transfers.

use usb_device::UsbDirection;

use crate::{
    chain,
    consensus::Consensus,
    gadget::Event,
    ral,
    timer::{Mode, Timer},
    udc::{self, DeviceInterrupt},
    Controller, Peripherals, Speed, Status,
};

/// Controller state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum State {
    /// No cable
    Detached,
    /// A cable is attached, but the device isn't visible to the host
    Disabled,
    /// Visible to the host. The speed is unknown until the host finishes
    /// speed enumeration.
    Connected(Speed),
    /// The host suspended the bus
    Suspended,
}

/// Device events that the driver handles
const DEVICE_INTERRUPTS: DeviceInterrupt = DeviceInterrupt::RESET
    .union(DeviceInterrupt::ENUM_DONE)
    .union(DeviceInterrupt::SUSPEND)
    .union(DeviceInterrupt::RESUME)
    .union(DeviceInterrupt::SET_CONFIG)
    .union(DeviceInterrupt::SET_INTERFACE);

impl<P: Peripherals> Controller<P> {
    /// Put the hardware into its probed state: soft disconnected, all
    /// interrupts masked but plug detect, recovery timer loaded
    pub(crate) fn initialize(&mut self) {
        ral::modify_reg!(udc, self.udc, DEVCTL, SD: 1);
        self.udc.DEVINTMSK.write(u32::MAX);
        self.udc.EPINTMSK.write(u32::MAX);
        self.udc.DEVINT.write(u32::MAX);
        self.udc.EPINT.write(u32::MAX);
        self.configure_speed();

        let mut timer = self.timer();
        timer.stop();
        timer.clear_elapsed();
        timer.set_load(self.config.recovery_period_us);
        timer.set_mode(Mode::Repeat);
        timer.set_interrupt_enabled(true);
        timer.reset();

        ral::write_reg!(udc, self.glue, GLUEINT, PLUG: 1);
        ral::modify_reg!(udc, self.glue, GLUEINTEN, PLUG: 1);

        self.attached = self.read_attached();
        self.state = if self.attached {
            State::Disabled
        } else {
            State::Detached
        };
        self.park_phy();
        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_IDLE: 1);
    }

    /// Let a host find the device
    ///
    /// If there's no cable, the controller connects as soon as one is
    /// attached.
    pub fn enable(&mut self) {
        self.enabled = true;
        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_IDLE: 0, PHY_SUSPEND: 0);
        self.udc.DEVINTMSK.write(!DEVICE_INTERRUPTS.bits());
        if self.attached {
            self.connect();
        }
        self.timer().run();
        debug!("ENABLED {:?}", self.state);
    }

    /// Soft disconnect from the host
    ///
    /// Every queued request completes with [`Status::Shutdown`](crate::Status::Shutdown).
    /// Calling `disconnect()` again has no further effect.
    pub fn disconnect(&mut self) {
        ral::modify_reg!(udc, self.udc, DEVCTL, SD: 1);
        self.enabled = false;
        self.stop_activity();
        self.timer().stop();
        self.state = if self.attached {
            State::Disabled
        } else {
            State::Detached
        };
        debug!("DISCONNECTED");
    }

    /// The bus went idle; enter low power
    pub fn suspend(&mut self) {
        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_SUSPEND: 1);
        if let State::Connected(speed) = self.state {
            if speed != Speed::Unknown {
                debug!("SUSPENDED");
                self.state = State::Suspended;
                self.events.push(Event::Suspend);
            }
        }
    }

    /// The bus is active again
    pub fn resume(&mut self) {
        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_SUSPEND: 0);
        if self.state == State::Suspended {
            debug!("RESUMED");
            self.state = State::Connected(self.speed);
            self.events.push(Event::Resume);
        }
    }

    /// Service the recovery timer
    ///
    /// An OUT transfer that's stuck in the middle of a descriptor for two
    /// ticks is closed, and its request completes with [`Status::Partial`].
    /// The interrupt handler calls this when the glue timer elapses; call it
    /// yourself if you keep time elsewhere.
    pub fn on_timer(&mut self) {
        for idx in (2..self.config.endpoints * 2).step_by(2) {
            let ep = &mut self.endpoints[idx];
            let Some(chain) = &ep.chain else {
                continue;
            };
            let progress =
                chain::progress(&self.alloc, chain, UsbDirection::Out, ep.max_packet_len());
            if progress.done {
                let status = if progress.error {
                    Status::Io
                } else {
                    Status::Complete
                };
                self.retire(idx, progress.bytes, status);
            } else if !progress.busy {
                ep.watch = None;
            } else if ep.watch == Some(progress.bytes) {
                warn!(
                    "EP{} OUT STUCK AFTER {} BYTES",
                    ep.address().index(),
                    progress.bytes
                );
                ep.set_nak(self.udc);
                self.retire(idx, progress.bytes, Status::Partial);
            } else {
                ep.watch = Some(progress.bytes);
            }
        }
    }

    /// Stop everything that depends on a host
    ///
    /// Requests complete with `Shutdown`, following a `Disconnect` event if
    /// the host had enumerated the device.
    pub(crate) fn stop_activity(&mut self) {
        if self.speed != Speed::Unknown {
            self.events.push(Event::Disconnect);
        }
        // Endpoint 0 comes back with the next speed enumeration.
        for idx in 0..self.endpoints.len() {
            self.cancel(idx, Status::Shutdown);
            self.endpoints[idx].deconfigure(self.udc);
        }
        self.ep0.invalidate();
        self.speed = Speed::Unknown;
        self.udc.EPINTMSK.write(u32::MAX);
    }

    /// Plug detect changed
    pub(crate) fn on_plug(&mut self) {
        let attached = self.read_attached();
        if attached == self.attached {
            return;
        }
        self.attached = attached;
        if attached {
            info!("ATTACHED");
            ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 0);
            if self.enabled {
                self.connect();
            } else {
                self.state = State::Disabled;
            }
        } else {
            info!("DETACHED");
            ral::modify_reg!(udc, self.udc, DEVCTL, SD: 1);
            ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 1);
            self.stop_activity();
            self.state = State::Detached;
        }
    }

    fn connect(&mut self) {
        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 0);
        ral::modify_reg!(udc, self.udc, DEVCTL, SD: 0);
        self.state = State::Connected(Speed::Unknown);
    }

    /// Plug status can glitch on a single read
    fn read_attached(&self) -> bool {
        Consensus::new(self.config.plug_read_retries)
            .read(|| ral::read_reg!(udc, self.glue, PLUGSTS, ATTACHED == 1))
    }

    /// Program the speed and power reports for the next enumeration
    pub(crate) fn configure_speed(&mut self) {
        let spd = match self.config.max_speed {
            Speed::High => udc::DEVCFG::SPD::RW::SPD_HS,
            _ => udc::DEVCFG::SPD::RW::SPD_FS,
        };
        ral::modify_reg!(
            udc,
            self.udc,
            DEVCFG,
            SPD: spd,
            SP: self.config.self_powered as u32,
            CSR_PRG: 1
        );
    }

    /// Idle the PHY according to the cable
    pub(crate) fn park_phy(&mut self) {
        if self.attached {
            ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 0, PHY_SUSPEND: 0, PHY_IDLE: 0);
        } else {
            ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 1);
        }
    }

    pub(crate) fn timer(&self) -> Timer<'static> {
        Timer::new(self.glue)
    }
}
