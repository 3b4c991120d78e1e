//! Endpoint association from a configuration descriptor
//!
//! The controller finishes SET_CONFIGURATION and SET_INTERFACE requests on
//! its own, so it needs to know which endpoints belong to which
//! configuration, interface, and alternate setting. Derive that table from
//! your configuration descriptor with [`bindings()`], and program it with
//! [`Controller::program_bindings`] once the host selects a configuration.
//!
//! ```
//! use usbd_dma::descriptor;
//!
//! const CONFIG: &[u8] = &[
//!     9, 2, 32, 0, 1, 1, 0, 0x80, 50, // configuration 1
//!     9, 4, 0, 0, 2, 0xFF, 0, 0, 0, //   interface 0
//!     7, 5, 0x81, 2, 0x00, 0x02, 0, //     EP1 IN, bulk, 512
//!     7, 5, 0x01, 2, 0x00, 0x02, 0, //     EP1 OUT, bulk, 512
//! ];
//!
//! let bindings = descriptor::bindings(CONFIG).collect::<Result<Vec<_>, _>>().unwrap();
//! assert_eq!(bindings.len(), 2);
//! assert_eq!(bindings[0].max_packet_size, 512);
//! ```

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{endpoint::Kind, ral, udc, Controller, Error, Peripherals};

const CONFIGURATION: u8 = 2;
const INTERFACE: u8 = 4;
const ENDPOINT: u8 = 5;

/// The largest max packet size that an association register holds
const MAX_PACKET_MASK: u16 = 0x7FF;

/// Where one endpoint lives in the device's configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct EndpointBinding {
    pub address: EndpointAddress,
    pub kind: Kind,
    pub max_packet_size: u16,
    pub configuration: u8,
    pub interface: u8,
    pub alternate: u8,
}

/// Walk the endpoint descriptors of a configuration descriptor
///
/// `config` is the whole configuration descriptor, as returned for
/// GET_DESCRIPTOR. A malformed descriptor produces one
/// [`Error::InvalidArgument`], then ends the iteration.
pub fn bindings(config: &[u8]) -> Bindings<'_> {
    Bindings {
        bytes: config,
        configuration: 0,
        interface: 0,
        alternate: 0,
        failed: false,
    }
}

/// Iterator returned by [`bindings()`]
pub struct Bindings<'a> {
    bytes: &'a [u8],
    configuration: u8,
    interface: u8,
    alternate: u8,
    failed: bool,
}

impl Bindings<'_> {
    fn fail(&mut self) -> Option<Result<EndpointBinding, Error>> {
        self.failed = true;
        Some(Err(Error::InvalidArgument))
    }
}

impl Iterator for Bindings<'_> {
    type Item = Result<EndpointBinding, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && !self.bytes.is_empty() {
            let length = usize::from(self.bytes[0]);
            if length < 2 || length > self.bytes.len() {
                return self.fail();
            }
            let (desc, rest) = self.bytes.split_at(length);
            self.bytes = rest;

            match desc[1] {
                CONFIGURATION => {
                    let Some(&configuration) = desc.get(5) else {
                        return self.fail();
                    };
                    self.configuration = configuration;
                }
                INTERFACE => {
                    let (Some(&interface), Some(&alternate)) = (desc.get(2), desc.get(3)) else {
                        return self.fail();
                    };
                    self.interface = interface;
                    self.alternate = alternate;
                }
                ENDPOINT => {
                    let &[_, _, address, attributes, lo, hi, ..] = desc else {
                        return self.fail();
                    };
                    let kind = match attributes & 0b11 {
                        0 => Kind::Control,
                        1 => Kind::Isochronous,
                        2 => Kind::Bulk,
                        _ => Kind::Interrupt,
                    };
                    return Some(Ok(EndpointBinding {
                        address: EndpointAddress::from(address),
                        kind,
                        max_packet_size: u16::from_le_bytes([lo, hi]) & MAX_PACKET_MASK,
                        configuration: self.configuration,
                        interface: self.interface,
                        alternate: self.alternate,
                    }));
                }
                _ => {}
            }
        }
        None
    }
}

impl<P: Peripherals> Controller<P> {
    /// Program the controller's endpoint associations
    ///
    /// Endpoint 0's association is managed by the controller, so `bindings`
    /// may not name endpoint 0. Associations beyond `bindings` are cleared.
    /// Nothing is written if any binding is invalid.
    pub fn program_bindings(&mut self, bindings: &[EndpointBinding]) -> Result<(), Error> {
        if bindings.len() >= udc::REGISTER_SETS {
            return Err(Error::InvalidArgument);
        }
        let valid = bindings.iter().all(|binding| {
            let index = binding.address.index();
            index != 0
                && index < self.config.endpoints
                && binding.max_packet_size <= MAX_PACKET_MASK
                && usize::from(binding.configuration) <= 0xF
                && usize::from(binding.interface) <= 0xF
                && usize::from(binding.alternate) <= 0xF
        });
        if !valid {
            return Err(Error::InvalidArgument);
        }

        for (assoc, binding) in self.udc.ASSOC[1..].iter().zip(bindings) {
            let dir = match binding.address.direction() {
                UsbDirection::In => udc::NE::DIR::RW::DIR_IN,
                UsbDirection::Out => udc::NE::DIR::RW::DIR_OUT,
            };
            ral::write_reg!(
                udc,
                assoc,
                NE,
                EPNUM: binding.address.index() as u32,
                DIR: dir,
                TYPE: binding.kind as u32,
                CFG: u32::from(binding.configuration),
                INTF: u32::from(binding.interface),
                ALT: u32::from(binding.alternate),
                MAXPKT: u32::from(binding.max_packet_size)
            );
        }
        for assoc in &self.udc.ASSOC[1 + bindings.len()..] {
            assoc.NE.write(0);
        }
        debug!("PROGRAMMED {} BINDINGS", bindings.len());
        Ok(())
    }
}
