//! The controller, and its transfer engine
//!
//! A [`Controller`] owns every endpoint, the descriptor allocator, and the
//! event queue. This module covers probe and removal, and the endpoint
//! operations that the function layer uses. Endpoint 0 sequencing lives in
//! `ep0`, interrupt dispatch in `interrupt`, and bus state in `lifecycle`.

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    chain,
    endpoint::{self, Endpoint, EndpointConfig, Kind},
    ep0::{Ep0, Ep0State},
    gadget::{self, Event, Events, EVENT_CAPACITY, EVENT_RESERVE},
    lifecycle::State,
    pool::{DescriptorAllocator, DescriptorPool},
    ral, udc, Config, Error, Gadget, Peripherals, QueueError, Request, Speed, Status,
    MAX_ENDPOINTS,
};

/// A USB device controller
///
/// After you [`probe()`](Controller::probe) a controller, call
/// [`enable()`](Controller::enable) to let a host find the device. Then
///
/// - call [`on_interrupt()`](Controller::on_interrupt) from the controller's
///   interrupt handler
/// - call [`poll()`](Controller::poll) to hand events to your [`Gadget`]
///
/// Endpoint 0 is managed by the controller. Configure the other endpoints
/// with [`enable_endpoint()`](Controller::enable_endpoint) once the host
/// selects a configuration.
pub struct Controller<P> {
    pub(crate) peripherals: P,
    pub(crate) udc: &'static udc::RegisterBlock,
    pub(crate) glue: &'static udc::GlueRegisterBlock,
    pub(crate) alloc: DescriptorAllocator<'static>,
    pub(crate) config: Config,
    /// Indexed by [`endpoint::index`]; OUT endpoints are even.
    pub(crate) endpoints: [Endpoint; MAX_ENDPOINTS * 2],
    pub(crate) events: Events,
    pub(crate) ep0: Ep0,
    pub(crate) state: State,
    pub(crate) speed: Speed,
    /// The function layer asked to be visible to a host
    pub(crate) enabled: bool,
    /// A cable is attached
    pub(crate) attached: bool,
}

impl<P: Peripherals> Controller<P> {
    /// Take control of the controller described by `peripherals`
    ///
    /// The controller starts soft-disconnected, with all interrupts masked
    /// but plug detect. Returns [`Error::AlreadyTaken`] if `pool` belongs
    /// to another controller, and [`Error::InvalidArgument`] for a bad
    /// `config`.
    pub fn probe<const N: usize>(
        peripherals: P,
        pool: &'static DescriptorPool<N>,
        config: Config,
    ) -> Result<Self, Error> {
        if !config.is_valid() {
            return Err(Error::InvalidArgument);
        }
        let alloc = pool
            .allocator(|desc| peripherals.dma_address(desc.cast()))
            .ok_or(Error::AlreadyTaken)?;

        peripherals.enable_clock();
        let ral::Instances { udc, glue } = ral::instances(&peripherals);

        let mut controller = Controller {
            peripherals,
            udc,
            glue,
            alloc,
            config,
            endpoints: core::array::from_fn(|idx| {
                let direction = if idx % 2 == 1 {
                    UsbDirection::In
                } else {
                    UsbDirection::Out
                };
                Endpoint::new(EndpointAddress::from_parts(idx / 2, direction))
            }),
            events: Events::new(),
            ep0: Ep0::new(),
            state: State::Detached,
            speed: Speed::Unknown,
            enabled: false,
            attached: false,
        };
        controller.initialize();
        info!(
            "PROBED {} ENDPOINTS, {} DESCRIPTORS",
            controller.config.endpoints,
            controller.alloc.capacity()
        );
        Ok(controller)
    }

    /// Release the controller, and return the peripherals
    ///
    /// Requests that are still queued are dropped; drain the event queue
    /// with [`poll()`](Controller::poll) first if you need them back. The
    /// descriptor pool stays taken.
    pub fn remove(mut self) -> P {
        ral::modify_reg!(udc, self.udc, DEVCTL, SD: 1);
        self.udc.DEVINTMSK.write(u32::MAX);
        self.udc.EPINTMSK.write(u32::MAX);
        self.glue.GLUEINTEN.write(0);
        self.timer().stop();

        for idx in 0..self.endpoints.len() {
            let ep = &mut self.endpoints[idx];
            let chain = ep.take_chain(self.udc);
            self.alloc.free(chain);
            ep.deconfigure(self.udc);
        }
        let setup = self.ep0.setup.take();
        self.alloc.free(setup);

        ral::modify_reg!(udc, self.glue, PHYCTL, PHY_RESET: 1);
        self.peripherals.disable_clock();
        info!("REMOVED");
        self.peripherals
    }

    /// Queue `request` on `endpoint`
    ///
    /// If the endpoint is idle, the request is mapped onto descriptors and
    /// handed to the controller right away. The request comes back through
    /// [`Gadget::complete()`]. A refused request is handed back in the
    /// error.
    ///
    /// On endpoint 0, the request is used by the current control transfer
    /// phase: the data stage, or a zero-length acknowledgement.
    pub fn queue(&mut self, endpoint: EndpointAddress, mut request: Request) -> Result<(), QueueError> {
        let idx = match self.endpoint_index(endpoint) {
            Ok(idx) => idx,
            Err(error) => return Err(QueueError::new(error, request)),
        };
        if !self.has_room() {
            return Err(QueueError::new(Error::QueueFull, request));
        }
        if idx < 2 {
            return self.ep0_queue(request);
        }

        let ep = &mut self.endpoints[idx];
        if !ep.is_enabled() {
            return Err(QueueError::new(Error::InvalidArgument, request));
        }
        if ep.queue.iter().any(|queued| queued.id() == request.id()) {
            return Err(QueueError::new(Error::InvalidArgument, request));
        }

        request.start();
        trace!(
            "EP{} {:?} QUEUE {} ({} BYTES)",
            endpoint.index(),
            endpoint.direction(),
            request.id(),
            request.length()
        );
        ep.queue
            .push(request)
            .map_err(|request| QueueError::new(Error::QueueFull, request))?;
        self.submit(idx);
        Ok(())
    }

    /// Cancel the request identified by `id`
    ///
    /// The request completes right away with [`Status::Cancelled`]. If the
    /// controller was working on it, the endpoint's FIFO is flushed, and
    /// the next request starts.
    pub fn dequeue(&mut self, endpoint: EndpointAddress, id: u32) -> Result<(), Error> {
        let idx = self.endpoint_index(endpoint)?;
        let ep = &mut self.endpoints[idx];
        let position = ep
            .queue
            .iter()
            .position(|request| request.id() == id)
            .ok_or(Error::InvalidArgument)?;

        if position == 0 && ep.is_busy() {
            ep.set_nak(self.udc);
            ep.flush(self.udc);
            let chain = ep.take_chain(self.udc);
            self.alloc.free(chain);
        }
        let mut request = ep.queue.remove(position);
        debug!("EP{} {:?} DEQUEUE {}", endpoint.index(), endpoint.direction(), id);
        request.finish(Status::Cancelled);
        self.events.push(Event::Complete {
            endpoint: ep.address(),
            request,
        });

        if idx < 2 {
            if position == 0 && self.ep0.state != Ep0State::Idle {
                self.ep0_stall(Status::Cancelled);
            }
        } else {
            self.submit(idx);
        }
        Ok(())
    }

    /// Stall, or clear the stall on, `endpoint`
    ///
    /// Returns [`Error::Busy`] when asked to stall an endpoint that still
    /// has requests. Clearing a stall starts any request that queued up in
    /// the meantime.
    pub fn set_halt(&mut self, endpoint: EndpointAddress, halt: bool) -> Result<(), Error> {
        let idx = self.endpoint_index(endpoint)?;
        if idx < 2 {
            if halt {
                self.ep0_stall(Status::Protocol);
            } else {
                for ep in &mut self.endpoints[..2] {
                    ep.set_stalled(self.udc, false);
                }
            }
            return Ok(());
        }

        let ep = &mut self.endpoints[idx];
        if !ep.is_enabled() {
            return Err(Error::InvalidArgument);
        }
        if halt && !ep.queue.is_empty() {
            warn!("EP{} {:?} HALT WITH QUEUED REQUESTS", endpoint.index(), endpoint.direction());
            return Err(Error::Busy);
        }
        debug!("EP{} {:?} HALT {}", endpoint.index(), endpoint.direction(), halt);
        ep.set_stalled(self.udc, halt);
        if !halt {
            self.submit(idx);
        }
        Ok(())
    }

    /// Configure `endpoint`
    ///
    /// Only available once the host enumerated the device. Requests still
    /// queued from a previous configuration complete with
    /// [`Status::Shutdown`].
    pub fn enable_endpoint(
        &mut self,
        endpoint: EndpointAddress,
        config: EndpointConfig,
    ) -> Result<(), Error> {
        let idx = self.endpoint_index(endpoint)?;
        if idx < 2 || self.speed == Speed::Unknown {
            return Err(Error::InvalidArgument);
        }
        let max_packet = config.max_packet_size as usize;
        if !is_valid_max_packet(config.kind, max_packet, self.speed) {
            warn!(
                "EP{} {:?} INVALID {:?} MAX PACKET {}",
                endpoint.index(),
                endpoint.direction(),
                config.kind,
                max_packet
            );
            return Err(Error::InvalidArgument);
        }

        self.cancel(idx, Status::Shutdown);
        let fifo_size = config.fifo_size.map_or(max_packet, usize::from);
        let ep = &mut self.endpoints[idx];
        ep.configure(self.udc, config.kind, max_packet, fifo_size);
        let mask = self.udc.EPINTMSK.read() & !ep.interrupt_bit();
        self.udc.EPINTMSK.write(mask);
        debug!(
            "EP{} {:?} ENABLED {:?} {}",
            endpoint.index(),
            endpoint.direction(),
            config.kind,
            max_packet
        );
        Ok(())
    }

    /// Stop using `endpoint`
    ///
    /// Queued requests complete with [`Status::Shutdown`].
    pub fn disable_endpoint(&mut self, endpoint: EndpointAddress) -> Result<(), Error> {
        let idx = self.endpoint_index(endpoint)?;
        if idx < 2 {
            return Err(Error::InvalidArgument);
        }
        self.cancel(idx, Status::Shutdown);
        let ep = &mut self.endpoints[idx];
        ep.deconfigure(self.udc);
        let mask = self.udc.EPINTMSK.read() | ep.interrupt_bit();
        self.udc.EPINTMSK.write(mask);
        debug!("EP{} {:?} DISABLED", endpoint.index(), endpoint.direction());
        Ok(())
    }

    /// Restart an endpoint queue
    ///
    /// After a request fails with [`Status::NoMemory`], the endpoint waits
    /// for the next [`queue()`](Controller::queue) or `kick()` before it
    /// tries the next request.
    pub fn kick(&mut self, endpoint: EndpointAddress) -> Result<(), Error> {
        let idx = self.endpoint_index(endpoint)?;
        if idx >= 2 {
            self.submit(idx);
        }
        Ok(())
    }

    /// Take the oldest event
    ///
    /// If it's a setup event, pass the function layer's answer to
    /// [`setup_result()`](Controller::setup_result).
    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    /// Hand every pending event to `gadget`
    ///
    /// Queue the requests that the gadget prepares during its callbacks
    /// after `poll()` returns, or use a [`SharedController`](crate::SharedController)
    /// to queue from inside the callbacks.
    pub fn poll(&mut self, gadget: &mut impl Gadget) {
        while let Some(event) = self.events.pop() {
            if let Some((tag, result)) = gadget::deliver(gadget, event) {
                self.setup_result(tag, result);
            }
        }
    }

    /// Returns the controller state
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the enumerated bus speed
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Returns the control transfer phase
    pub fn ep0_state(&self) -> Ep0State {
        self.ep0.state
    }

    /// Indicates if `endpoint` is stalled
    pub fn is_halted(&self, endpoint: EndpointAddress) -> bool {
        self.endpoint_index(endpoint)
            .map(|idx| self.endpoints[idx].is_halted())
            .unwrap_or(false)
    }

    /// Indicates if `endpoint` is configured
    pub fn is_enabled(&self, endpoint: EndpointAddress) -> bool {
        self.endpoint_index(endpoint)
            .map(|idx| self.endpoints[idx].is_enabled())
            .unwrap_or(false)
    }

    /// The number of requests waiting on `endpoint`, including the one in
    /// flight
    pub fn queued(&self, endpoint: EndpointAddress) -> usize {
        self.endpoint_index(endpoint)
            .map(|idx| self.endpoints[idx].queue.len())
            .unwrap_or(0)
    }

    /// Descriptors available for new transfers
    pub fn free_descriptors(&self) -> usize {
        self.alloc.available()
    }

    /// How many control transfers were abandoned because a setup packet
    /// arrived in the middle of them
    pub fn protocol_errors(&self) -> u32 {
        self.ep0.protocol_errors
    }

    fn endpoint_index(&self, endpoint: EndpointAddress) -> Result<usize, Error> {
        if endpoint.index() < self.config.endpoints {
            Ok(endpoint::index(endpoint))
        } else {
            Err(Error::InvalidArgument)
        }
    }

    /// Every queued request needs a slot for its completion
    fn has_room(&self) -> bool {
        let queued: usize = self.endpoints.iter().map(|ep| ep.queue.len()).sum();
        queued + self.events.len() < EVENT_CAPACITY - EVENT_RESERVE
    }

    /// Map the head request of an idle endpoint onto descriptors, and start
    /// the transfer
    ///
    /// If the pool can't describe the request, the request completes with
    /// [`Status::NoMemory`], and the endpoint waits for a kick.
    pub(crate) fn submit(&mut self, idx: usize) {
        let ep = &mut self.endpoints[idx];
        if ep.is_busy() || ep.is_halted() {
            return;
        }
        let Some(request) = ep.queue.first() else {
            return;
        };

        let buffer = self.peripherals.dma_address(request.as_ptr());
        match chain::build(&mut self.alloc, request, ep.max_packet_len(), buffer) {
            Ok(chain) => {
                let address = self.alloc.address(chain.head());
                ep.start_transfer(self.udc, chain, address);
            }
            Err(_error) => {
                warn!(
                    "EP{} {:?} {:?}; {} DESCRIPTORS FREE",
                    ep.address().index(),
                    ep.address().direction(),
                    _error,
                    self.alloc.available()
                );
                if let Some(mut request) = ep.pop_request() {
                    request.finish(Status::NoMemory);
                    self.events.push(Event::Complete {
                        endpoint: ep.address(),
                        request,
                    });
                }
            }
        }
    }

    /// Release the endpoint's chain, complete the head request, and start
    /// the next one
    pub(crate) fn retire(&mut self, idx: usize, bytes: usize, status: Status) {
        let ep = &mut self.endpoints[idx];
        let chain = ep.take_chain(self.udc);
        self.alloc.free(chain);
        if let Some(mut request) = ep.pop_request() {
            request.set_actual(bytes);
            request.finish(status);
            trace!(
                "EP{} {:?} RETIRE {} {:?} {}",
                ep.address().index(),
                ep.address().direction(),
                request.id(),
                status,
                request.actual()
            );
            self.events.push(Event::Complete {
                endpoint: ep.address(),
                request,
            });
        }
        self.submit(idx);
    }

    /// Release the endpoint's chain, and complete every request with `status`
    pub(crate) fn cancel(&mut self, idx: usize, status: Status) {
        let ep = &mut self.endpoints[idx];
        if ep.is_busy() {
            ep.flush(self.udc);
        }
        let chain = ep.take_chain(self.udc);
        self.alloc.free(chain);
        while let Some(mut request) = ep.pop_request() {
            request.finish(status);
            self.events.push(Event::Complete {
                endpoint: ep.address(),
                request,
            });
        }
    }
}

/// Check a max packet size against the USB 2.0 limits for `kind` at `speed`
fn is_valid_max_packet(kind: Kind, max_packet: usize, speed: Speed) -> bool {
    match (kind, speed) {
        (Kind::Bulk, Speed::High) => max_packet == 512,
        (Kind::Bulk, Speed::Full) => matches!(max_packet, 8 | 16 | 32 | 64),
        (Kind::Interrupt, Speed::High) => (1..=1024).contains(&max_packet),
        (Kind::Interrupt, Speed::Full) => (1..=64).contains(&max_packet),
        (Kind::Interrupt, Speed::Low) => (1..=8).contains(&max_packet),
        (Kind::Isochronous, Speed::High) => (1..=1024).contains(&max_packet),
        (Kind::Isochronous, Speed::Full) => (1..=1023).contains(&max_packet),
        _ => false,
    }
}
