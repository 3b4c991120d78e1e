//! Control request setup packets

use usb_device::{control::Request as Standard, UsbDirection};

/// Request type, from bits 6..5 of `bmRequestType`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Request recipient, from bits 4..0 of `bmRequestType`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

/// The 8-byte setup packet that starts a control transfer
///
/// The controller doesn't interpret requests; it forwards them to the
/// [`Gadget`](crate::Gadget). The only exceptions are the requests that the
/// hardware completes on its own, which the driver re-creates with
/// [`set_configuration()`](SetupPacket::set_configuration) and
/// [`set_interface()`](SetupPacket::set_interface).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode the little-endian wire layout
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0; 8];
        bytes[0] = self.request_type;
        bytes[1] = self.request;
        bytes[2..4].copy_from_slice(&self.value.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.index.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// A standard SET_CONFIGURATION request for `configuration`
    pub fn set_configuration(configuration: u8) -> Self {
        SetupPacket {
            request_type: 0x00,
            request: Standard::SET_CONFIGURATION,
            value: configuration.into(),
            index: 0,
            length: 0,
        }
    }

    /// A standard SET_INTERFACE request selecting `alternate` on `interface`
    pub fn set_interface(interface: u8, alternate: u8) -> Self {
        SetupPacket {
            request_type: 0x01,
            request: Standard::SET_INTERFACE,
            value: alternate.into(),
            index: interface.into(),
            length: 0,
        }
    }

    /// Direction of the data stage
    pub fn direction(&self) -> UsbDirection {
        if self.request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    pub fn request_type(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// Indicates if this request has a data stage
    pub fn has_data(&self) -> bool {
        self.length != 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Recipient, RequestType, SetupPacket};
    use usb_device::UsbDirection;

    #[test]
    fn get_descriptor() {
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::In);
        assert_eq!(setup.request_type(), RequestType::Standard);
        assert_eq!(setup.recipient(), Recipient::Device);
        assert_eq!(setup.request, 6);
        assert_eq!(setup.value, 0x0100);
        assert_eq!(setup.length, 18);
        assert!(setup.has_data());
        assert_eq!(
            setup.to_bytes(),
            [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]
        );
    }

    #[test]
    fn class_out() {
        let setup = SetupPacket::from_bytes([0x21, 0x09, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::Out);
        assert_eq!(setup.request_type(), RequestType::Class);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(setup.index, 1);
        assert!(!setup.has_data());
    }

    #[test]
    fn synthesized() {
        let setup = SetupPacket::set_configuration(2);
        assert_eq!(setup.to_bytes(), [0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let setup = SetupPacket::set_interface(3, 1);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(setup.to_bytes(), [0x01, 0x0B, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00]);
    }
}
