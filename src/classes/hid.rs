//! HID boot mouse and keyboard.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::core::{ClassError, ClassResult, DeviceState, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

pub const HID_CLASS: u8 = 0x03;
pub const HID_SUBCLASS_BOOT: u8 = 0x01;
pub const HID_PROTOCOL_KEYBOARD: u8 = 0x01;
pub const HID_PROTOCOL_MOUSE: u8 = 0x02;

/// Class request codes (HID 1.11 section 7.2).
pub const GET_REPORT: u8 = 0x01;
pub const GET_IDLE: u8 = 0x02;
pub const GET_PROTOCOL: u8 = 0x03;
pub const SET_REPORT: u8 = 0x09;
pub const SET_IDLE: u8 = 0x0A;
pub const SET_PROTOCOL: u8 = 0x0B;

/// HID descriptor type codes.
pub const DESC_TYPE_HID: u8 = 0x21;
pub const DESC_TYPE_REPORT: u8 = 0x22;

const FS_BINTERVAL: u8 = 0x0A;
const HS_BINTERVAL: u8 = 0x07;

/// Boot keyboard report descriptor: 8 byte input report (modifiers,
/// reserved, six keycodes) and a 5 bit LED output report.
const KEYBOARD_REPORT_DESC: [u8; 63] = [
    0x05, 0x01,        // Usage Page (Generic Desktop)
    0x09, 0x06,        // Usage (Keyboard)
    0xA1, 0x01,        // Collection (Application)
    0x05, 0x07,        //   Usage Page (Key Codes)
    0x19, 0xE0,        //   Usage Minimum (224)
    0x29, 0xE7,        //   Usage Maximum (231)
    0x15, 0x00,        //   Logical Minimum (0)
    0x25, 0x01,        //   Logical Maximum (1)
    0x75, 0x01,        //   Report Size (1)
    0x95, 0x08,        //   Report Count (8)
    0x81, 0x02,        //   Input (Data, Variable, Absolute)
    0x95, 0x01,        //   Report Count (1)
    0x75, 0x08,        //   Report Size (8)
    0x81, 0x01,        //   Input (Constant)
    0x95, 0x05,        //   Report Count (5)
    0x75, 0x01,        //   Report Size (1)
    0x05, 0x08,        //   Usage Page (LEDs)
    0x19, 0x01,        //   Usage Minimum (1)
    0x29, 0x05,        //   Usage Maximum (5)
    0x91, 0x02,        //   Output (Data, Variable, Absolute)
    0x95, 0x01,        //   Report Count (1)
    0x75, 0x03,        //   Report Size (3)
    0x91, 0x01,        //   Output (Constant)
    0x95, 0x06,        //   Report Count (6)
    0x75, 0x08,        //   Report Size (8)
    0x15, 0x00,        //   Logical Minimum (0)
    0x25, 0x65,        //   Logical Maximum (101)
    0x05, 0x07,        //   Usage Page (Key Codes)
    0x19, 0x00,        //   Usage Minimum (0)
    0x29, 0x65,        //   Usage Maximum (101)
    0x81, 0x00,        //   Input (Data, Array)
    0xC0,              // End Collection
];

/// Boot mouse report descriptor: buttons plus relative X/Y.
const MOUSE_REPORT_DESC: [u8; 50] = [
    0x05, 0x01,        // Usage Page (Generic Desktop)
    0x09, 0x02,        // Usage (Mouse)
    0xA1, 0x01,        // Collection (Application)
    0x09, 0x01,        //   Usage (Pointer)
    0xA1, 0x00,        //   Collection (Physical)
    0x05, 0x09,        //     Usage Page (Buttons)
    0x19, 0x01,        //     Usage Minimum (1)
    0x29, 0x03,        //     Usage Maximum (3)
    0x15, 0x00,        //     Logical Minimum (0)
    0x25, 0x01,        //     Logical Maximum (1)
    0x95, 0x03,        //     Report Count (3)
    0x75, 0x01,        //     Report Size (1)
    0x81, 0x02,        //     Input (Data, Variable, Absolute)
    0x95, 0x01,        //     Report Count (1)
    0x75, 0x05,        //     Report Size (5)
    0x81, 0x01,        //     Input (Constant)
    0x05, 0x01,        //     Usage Page (Generic Desktop)
    0x09, 0x30,        //     Usage (X)
    0x09, 0x31,        //     Usage (Y)
    0x15, 0x81,        //     Logical Minimum (-127)
    0x25, 0x7F,        //     Logical Maximum (127)
    0x75, 0x08,        //     Report Size (8)
    0x95, 0x02,        //     Report Count (2)
    0x81, 0x06,        //     Input (Data, Variable, Relative)
    0xC0,              //   End Collection
    0xC0,              // End Collection
];

pub struct Hid {
    protocol_code: u8,
    report_desc: &'static [u8],
    report_size: u16,
    interface_name: &'static str,
    identity: ClassIdentity,
    idle_rate: u8,
    protocol: u8,
    tx_busy: bool,
    report_pending: bool,
}

impl Hid {
    pub fn keyboard() -> Self {
        Hid::new(HID_PROTOCOL_KEYBOARD, &KEYBOARD_REPORT_DESC, 8, "Keyboard")
    }

    pub fn mouse() -> Self {
        Hid::new(HID_PROTOCOL_MOUSE, &MOUSE_REPORT_DESC, 3, "Mouse")
    }

    fn new(protocol_code: u8, report_desc: &'static [u8],
           report_size: u16, interface_name: &'static str) -> Self
    {
        Hid {
            protocol_code,
            report_desc,
            report_size,
            interface_name,
            identity: ClassIdentity::default(),
            idle_rate: 0,
            protocol: 0,
            tx_busy: false,
            report_pending: false,
        }
    }

    fn endpoint(&self) -> EndpointAddr {
        self.identity.in_ep(0)
    }

    /// Queue an input report for the next interrupt poll. Refused
    /// while the previous report is still in flight.
    pub fn send_report(&mut self, core: &mut dyn UsbCore, report: &[u8])
        -> ClassResult<()>
    {
        if core.device_state() != DeviceState::Configured {
            return Err(ClassError::Stall);
        }
        if self.tx_busy {
            return Err(ClassError::Busy);
        }
        self.tx_busy = true;
        core.transmit(self.endpoint(), report);
        Ok(())
    }
}

impl ClassDriver for Hid {
    fn name(&self) -> &'static str {
        match self.protocol_code {
            HID_PROTOCOL_KEYBOARD => "hid-keyboard",
            _ => "hid-mouse",
        }
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 1,
            in_endpoints: 1,
            out_endpoints: 0,
            strings: vec![String::from(self.interface_name)],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, speed: Speed) -> Vec<u8> {
        let interval = match speed {
            Speed::Full => FS_BINTERVAL,
            Speed::High => HS_BINTERVAL,
        };
        let mut writer = DescriptorWriter::new();
        writer.interface(self.identity.interface(0), 0, 1, HID_CLASS,
                         HID_SUBCLASS_BOOT, self.protocol_code,
                         self.identity.string(0));
        writer.hid(0, self.report_desc.len() as u16);
        writer.endpoint(self.endpoint(),
                        EndpointAttr(EndpointType::Interrupt as u8),
                        self.report_size, interval);
        writer.finish()
    }

    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        core.open_ep(self.endpoint(), EndpointType::Interrupt,
                     self.report_size);
        self.tx_busy = false;
        self.idle_rate = 0;
        self.protocol = 0;
        Ok(())
    }

    fn deinit(&mut self, core: &mut dyn UsbCore) {
        core.close_ep(self.endpoint());
        self.tx_busy = false;
    }

    fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        match fields.type_fields.request_type() {
            RequestType::Class => match fields.request {
                SET_IDLE => {
                    self.idle_rate = (fields.value >> 8) as u8;
                    Ok(())
                },
                GET_IDLE => {
                    core.ctl_send(&[self.idle_rate]);
                    Ok(())
                },
                SET_PROTOCOL => {
                    self.protocol = fields.value as u8;
                    Ok(())
                },
                GET_PROTOCOL => {
                    core.ctl_send(&[self.protocol]);
                    Ok(())
                },
                SET_REPORT => {
                    if fields.length > 0 {
                        core.ctl_receive(fields.length as usize);
                        self.report_pending = true;
                    }
                    Ok(())
                },
                _ => Err(ClassError::Stall),
            },
            RequestType::Standard =>
                match StandardRequest::from(fields.request) {
                    StandardRequest::GetDescriptor => {
                        let length = fields.length as usize;
                        match (fields.value >> 8) as u8 {
                            DESC_TYPE_REPORT => {
                                let len = self.report_desc.len().min(length);
                                core.ctl_send(&self.report_desc[.. len]);
                                Ok(())
                            },
                            DESC_TYPE_HID => {
                                let mut writer = DescriptorWriter::new();
                                writer.hid(
                                    0, self.report_desc.len() as u16);
                                let bytes = writer.finish();
                                let len = bytes.len().min(length);
                                core.ctl_send(&bytes[.. len]);
                                Ok(())
                            },
                            _ => Err(ClassError::Stall),
                        }
                    },
                    StandardRequest::GetInterface => {
                        core.ctl_send(&[0]);
                        Ok(())
                    },
                    StandardRequest::SetInterface => Ok(()),
                    StandardRequest::GetStatus => {
                        core.ctl_send(&[0, 0]);
                        Ok(())
                    },
                    _ => Err(ClassError::Stall),
                },
            _ => Err(ClassError::Stall),
        }
    }

    fn data_in(&mut self, _core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep == self.endpoint().number() {
            self.tx_busy = false;
        }
        Ok(())
    }

    fn ep0_rx_ready(&mut self, core: &mut dyn UsbCore) {
        if self.report_pending {
            // Output reports (keyboard LEDs) are accepted and dropped.
            self.report_pending = false;
            let mut buffer = [0u8; 8];
            core.ctl_rx_data(&mut buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCore;

    fn keyboard(core: &mut MockCore) -> Hid {
        let mut hid = Hid::keyboard();
        hid.assign(ClassIdentity {
            interfaces: vec![InterfaceNum(0)],
            in_endpoints: vec![EndpointAddr(0x81)],
            out_endpoints: vec![],
            strings: vec![StringId(6)],
        });
        hid.init(core).unwrap();
        hid
    }

    #[test]
    fn test_fragment_layout() {
        let mut core = MockCore::new();
        let hid = keyboard(&mut core);
        let fragment = hid.config_fragment(Speed::Full);
        // Interface + HID descriptor + interrupt endpoint.
        assert_eq!(fragment.len(), 9 + 9 + 7);
        // HID descriptor announces the report descriptor length.
        assert_eq!(u16::from_le_bytes([fragment[16], fragment[17]]),
                   KEYBOARD_REPORT_DESC.len() as u16);
        // Full speed polls at 10ms, high speed at 2^(7-1) microframes.
        assert_eq!(fragment[24], FS_BINTERVAL);
        assert_eq!(hid.config_fragment(Speed::High)[24], HS_BINTERVAL);
    }

    #[test]
    fn test_report_descriptor_request() {
        let mut core = MockCore::new();
        let mut hid = keyboard(&mut core);
        let fields = SetupFields::from_bytes(&[
            0x81, 0x06, 0x00, 0x22, 0x00, 0x00, 0xFF, 0x00]);
        hid.setup(&mut core, &fields).unwrap();
        assert_eq!(core.ep0_sent.last().unwrap().as_slice(),
                   &KEYBOARD_REPORT_DESC[..]);
    }

    #[test]
    fn test_idle_and_protocol_state() {
        let mut core = MockCore::new();
        let mut hid = keyboard(&mut core);

        // SET_IDLE with duration 0x20 in the high byte of wValue.
        let fields = SetupFields::from_bytes(&[
            0x21, SET_IDLE, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00]);
        hid.setup(&mut core, &fields).unwrap();
        let fields = SetupFields::from_bytes(&[
            0xA1, GET_IDLE, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
        hid.setup(&mut core, &fields).unwrap();
        assert_eq!(core.ep0_sent.last().unwrap(), &vec![0x20]);

        let fields = SetupFields::from_bytes(&[
            0x21, SET_PROTOCOL, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        hid.setup(&mut core, &fields).unwrap();
        let fields = SetupFields::from_bytes(&[
            0xA1, GET_PROTOCOL, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
        hid.setup(&mut core, &fields).unwrap();
        assert_eq!(core.ep0_sent.last().unwrap(), &vec![0x01]);
    }

    #[test]
    fn test_send_report_busy_until_polled() {
        let mut core = MockCore::new();
        let mut hid = keyboard(&mut core);

        hid.send_report(&mut core, &[0; 8]).unwrap();
        assert_eq!(hid.send_report(&mut core, &[0; 8]),
                   Err(ClassError::Busy));
        hid.data_in(&mut core, EndpointNum(1)).unwrap();
        hid.send_report(&mut core, &[0; 8]).unwrap();
    }
}
