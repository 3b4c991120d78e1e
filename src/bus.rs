//! Sharing a controller between the interrupt handler and the function layer

use crate::{
    descriptor::EndpointBinding, gadget, Controller, EndpointConfig, Ep0State, Error, Gadget,
    IrqResult, Peripherals, QueueError, Request, Speed, State,
};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::endpoint::EndpointAddress;

/// A controller that's safe to use from both the interrupt handler and the
/// function layer
///
/// Every operation runs in a critical section. [`poll()`](SharedController::poll)
/// calls the gadget outside of the critical section, so the gadget may use
/// the `SharedController` from its callbacks.
///
/// Make sure you've fully configured your controller before wrapping it in
/// `SharedController`.
pub struct SharedController<P> {
    controller: Mutex<RefCell<Controller<P>>>,
}

impl<P: Peripherals> SharedController<P> {
    pub fn new(controller: Controller<P>) -> Self {
        SharedController {
            controller: Mutex::new(RefCell::new(controller)),
        }
    }

    /// Interrupt-safe, immutable access to the controller
    pub fn with_controller<R>(&self, func: impl FnOnce(&Controller<P>) -> R) -> R {
        interrupt::free(|cs| {
            let controller = self.controller.borrow(cs);
            let controller = controller.borrow();
            func(&*controller)
        })
    }

    /// Interrupt-safe, mutable access to the controller
    pub fn with_controller_mut<R>(&self, func: impl FnOnce(&mut Controller<P>) -> R) -> R {
        interrupt::free(|cs| {
            let controller = self.controller.borrow(cs);
            let mut controller = controller.borrow_mut();
            func(&mut *controller)
        })
    }

    /// See [`Controller::on_interrupt`]
    pub fn on_interrupt(&self) -> IrqResult {
        self.with_controller_mut(|ctrl| ctrl.on_interrupt())
    }

    /// Hand every pending event to `gadget`
    ///
    /// Each event is taken in its own critical section; the gadget runs with
    /// interrupts enabled.
    pub fn poll(&self, gadget: &mut impl Gadget) {
        while let Some(event) = self.with_controller_mut(|ctrl| ctrl.pop_event()) {
            if let Some((tag, result)) = gadget::deliver(gadget, event) {
                self.with_controller_mut(|ctrl| ctrl.setup_result(tag, result));
            }
        }
    }

    pub fn queue(&self, endpoint: EndpointAddress, request: Request) -> Result<(), QueueError> {
        self.with_controller_mut(|ctrl| ctrl.queue(endpoint, request))
    }

    pub fn dequeue(&self, endpoint: EndpointAddress, id: u32) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.dequeue(endpoint, id))
    }

    pub fn set_halt(&self, endpoint: EndpointAddress, halt: bool) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.set_halt(endpoint, halt))
    }

    pub fn enable_endpoint(
        &self,
        endpoint: EndpointAddress,
        config: EndpointConfig,
    ) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.enable_endpoint(endpoint, config))
    }

    pub fn disable_endpoint(&self, endpoint: EndpointAddress) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.disable_endpoint(endpoint))
    }

    pub fn kick(&self, endpoint: EndpointAddress) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.kick(endpoint))
    }

    pub fn program_bindings(&self, bindings: &[EndpointBinding]) -> Result<(), Error> {
        self.with_controller_mut(|ctrl| ctrl.program_bindings(bindings))
    }

    pub fn enable(&self) {
        self.with_controller_mut(|ctrl| ctrl.enable());
    }

    pub fn disconnect(&self) {
        self.with_controller_mut(|ctrl| ctrl.disconnect());
    }

    pub fn suspend(&self) {
        self.with_controller_mut(|ctrl| ctrl.suspend());
    }

    pub fn resume(&self) {
        self.with_controller_mut(|ctrl| ctrl.resume());
    }

    pub fn on_timer(&self) {
        self.with_controller_mut(|ctrl| ctrl.on_timer());
    }

    pub fn state(&self) -> State {
        self.with_controller(|ctrl| ctrl.state())
    }

    pub fn speed(&self) -> Speed {
        self.with_controller(|ctrl| ctrl.speed())
    }

    pub fn ep0_state(&self) -> Ep0State {
        self.with_controller(|ctrl| ctrl.ep0_state())
    }

    pub fn is_halted(&self, endpoint: EndpointAddress) -> bool {
        self.with_controller(|ctrl| ctrl.is_halted(endpoint))
    }

    pub fn free_descriptors(&self) -> usize {
        self.with_controller(|ctrl| ctrl.free_descriptors())
    }
}
