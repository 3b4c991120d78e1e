//! A driver for descriptor-DMA USB device controllers
//!
//! `usbd-dma` runs the device side of a USB 2.0 controller that moves data
//! through chains of DMA buffer descriptors. It sequences control transfers
//! on endpoint 0, maps transfer [`Request`]s onto descriptor chains for the
//! other endpoints, and reacts to cable, bus, and endpoint interrupts. The
//! class-specific logic lives above this crate, behind the [`Gadget`] trait.
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`], and allocate a static [`DescriptorPool`]. Then, probe a
//! [`Controller`]:
//!
//! ```no_run
//! use usbd_dma::{Config, Controller, DescriptorPool, Peripherals};
//!
//! struct Udc;
//! unsafe impl Peripherals for Udc {
//!     fn udc(&self) -> *const () { 0x4003_0000 as _ }
//!     fn glue(&self) -> *const () { 0x4003_1000 as _ }
//! }
//!
//! static DESCRIPTORS: DescriptorPool<128> = DescriptorPool::new();
//!
//! let mut controller = Controller::probe(Udc, &DESCRIPTORS, Config::default()).unwrap();
//! controller.enable();
//! // Call controller.on_interrupt() from the USB ISR, and controller.poll()
//! // to deliver events to your gadget.
//! ```
//!
//! If the interrupt handler and the function layer run in different
//! contexts, wrap the controller in a [`SharedController`].

#![no_std]

#[macro_use]
mod log;

mod bus;
mod chain;
mod desc;
mod driver;
mod endpoint;
mod ep0;
mod gadget;
mod interrupt;
mod lifecycle;
mod pool;
mod ral;
mod request;
mod setup;
mod udc;

pub mod consensus;
pub mod descriptor;
pub mod timer;

#[cfg(test)]
mod sim;

pub use bus::SharedController;
pub use driver::Controller;
pub use endpoint::{EndpointConfig, Kind, QUEUE_DEPTH};
pub use ep0::Ep0State;
pub use gadget::{Event, Gadget};
pub use interrupt::IrqResult;
pub use lifecycle::State;
pub use pool::{DescriptorPool, MAX_DESCRIPTORS};
pub use request::{Request, Status};
pub use setup::{Recipient, RequestType, SetupPacket};

/// The most endpoint numbers that a controller implements, including
/// endpoint 0
pub const MAX_ENDPOINTS: usize = 8;

/// A type that owns the controller's register blocks
///
/// An implementation of `Peripherals` is expected to own
///
/// - the device controller registers
/// - the glue registers (plug detect, PHY control, timer)
///
/// for one controller instance.
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns the register blocks required for all controller
/// operation. The pointers returned by the methods are
/// assumed to be valid, and will be cast to register
/// definitions.
///
/// `dma_address` must produce the address that the controller's DMA engine
/// uses to reach the given memory.
pub unsafe trait Peripherals {
    /// Returns the address of the device controller registers
    fn udc(&self) -> *const ();
    /// Returns the address of the glue registers
    fn glue(&self) -> *const ();
    /// Turn on the controller's clocks. Called once, when probing.
    fn enable_clock(&self) {}
    /// Turn off the controller's clocks. Called when the controller is removed.
    fn disable_clock(&self) {}
    /// Translate a CPU address into a controller address
    ///
    /// The default implementation assumes that the controller and the CPU
    /// share one address map.
    fn dma_address(&self, address: *const u8) -> u32 {
        address as usize as u32
    }
}

/// USB bus speed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Speed {
    /// No host, or the host hasn't finished speed enumeration
    Unknown,
    Low,
    Full,
    High,
}

/// How the controller finishes a control OUT transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum StatusStage {
    /// The hardware sends the status handshake once the data stage retires
    Automatic,
    /// The driver sends a zero-length IN packet to finish the transfer
    Explicit,
}

/// Controller configuration
///
/// Describes the silicon, and the driver's recovery policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Config {
    /// Endpoint numbers implemented by the controller, including endpoint 0
    pub endpoints: usize,
    /// The fastest speed to advertise. Either [`Speed::High`] or [`Speed::Full`].
    pub max_speed: Speed,
    pub self_powered: bool,
    pub status_stage: StatusStage,
    /// How often the recovery timer looks for stuck OUT transfers
    pub recovery_period_us: u32,
    /// Reads per plug-detect sample
    pub plug_read_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoints: MAX_ENDPOINTS,
            max_speed: Speed::High,
            self_powered: false,
            status_stage: StatusStage::Automatic,
            recovery_period_us: 2000,
            plug_read_retries: 3,
        }
    }
}

impl Config {
    pub fn with_endpoints(mut self, endpoints: usize) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_max_speed(mut self, max_speed: Speed) -> Self {
        self.max_speed = max_speed;
        self
    }

    pub fn with_self_powered(mut self, self_powered: bool) -> Self {
        self.self_powered = self_powered;
        self
    }

    pub fn with_status_stage(mut self, status_stage: StatusStage) -> Self {
        self.status_stage = status_stage;
        self
    }

    pub fn with_recovery_period_us(mut self, recovery_period_us: u32) -> Self {
        self.recovery_period_us = recovery_period_us;
        self
    }

    pub fn with_plug_read_retries(mut self, plug_read_retries: usize) -> Self {
        self.plug_read_retries = plug_read_retries;
        self
    }

    fn is_valid(&self) -> bool {
        (1..=MAX_ENDPOINTS).contains(&self.endpoints)
            && matches!(self.max_speed, Speed::High | Speed::Full)
            && self.recovery_period_us > 0
            && self.recovery_period_us <= timer::MAX_LOAD
    }
}

/// Driver errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Error {
    /// Unknown or disabled endpoint, bad endpoint configuration, or an
    /// unknown request
    InvalidArgument,
    /// The operation doesn't fit the controller's, or the control
    /// transfer's, current state
    InvalidState,
    /// The descriptor pool is exhausted
    NoMemory,
    /// No more requests fit on the endpoint
    QueueFull,
    /// The endpoint has requests in flight
    Busy,
    /// The control transfer was abandoned, and endpoint 0 stalled
    Protocol,
    /// The descriptor pool belongs to another controller
    AlreadyTaken,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::InvalidArgument => "invalid argument",
            Error::InvalidState => "invalid state",
            Error::NoMemory => "descriptor pool exhausted",
            Error::QueueFull => "request queue full",
            Error::Busy => "endpoint busy",
            Error::Protocol => "control protocol error",
            Error::AlreadyTaken => "descriptor pool already taken",
        };
        f.write_str(msg)
    }
}

impl From<Error> for usb_device::UsbError {
    fn from(error: Error) -> Self {
        use usb_device::UsbError;
        match error {
            Error::InvalidArgument => UsbError::InvalidEndpoint,
            Error::InvalidState | Error::Protocol => UsbError::InvalidState,
            Error::NoMemory => UsbError::EndpointMemoryOverflow,
            Error::QueueFull | Error::Busy => UsbError::WouldBlock,
            Error::AlreadyTaken => UsbError::Unsupported,
        }
    }
}

/// A request that the controller refused, handed back with the reason
#[derive(Debug)]
pub struct QueueError {
    pub error: Error,
    pub request: Request,
}

impl QueueError {
    pub(crate) fn new(error: Error, request: Request) -> Self {
        QueueError { error, request }
    }
}

impl From<QueueError> for Error {
    fn from(error: QueueError) -> Self {
        error.error
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Error, Speed};
    use usb_device::UsbError;

    #[test]
    fn config_validation() {
        assert!(Config::default().is_valid());
        assert!(!Config::default().with_endpoints(0).is_valid());
        assert!(!Config::default().with_endpoints(9).is_valid());
        assert!(!Config::default().with_max_speed(Speed::Low).is_valid());
        assert!(!Config::default().with_recovery_period_us(0).is_valid());
        assert!(Config::default().with_max_speed(Speed::Full).is_valid());
    }

    #[test]
    fn usb_error() {
        assert_eq!(UsbError::from(Error::NoMemory), UsbError::EndpointMemoryOverflow);
        assert_eq!(UsbError::from(Error::Busy), UsbError::WouldBlock);
    }
}
