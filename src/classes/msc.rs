//! Mass storage class with bulk-only transport.
//!
//! The driver owns the interface and endpoint plumbing; the command
//! and data phases of the BOT protocol live behind [`MscTransport`],
//! which receives raw bulk OUT payloads and completion callbacks and
//! transmits through the core it is handed.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::core::{ClassError, ClassResult, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

pub const MSC_CLASS: u8 = 0x08;
pub const MSC_SUBCLASS_SCSI: u8 = 0x06;
pub const MSC_PROTOCOL_BOT: u8 = 0x50;

/// Class request codes (BOT specification section 3).
pub const BOT_GET_MAX_LUN: u8 = 0xFE;
pub const BOT_RESET: u8 = 0xFF;

const FS_MAX_PACKET_SIZE: u16 = 64;
const HS_MAX_PACKET_SIZE: u16 = 512;

/// Storage backend driving the BOT state machine.
pub trait MscTransport {
    /// Highest logical unit number, zero for a single-LUN device.
    fn max_lun(&self) -> u8 {
        0
    }

    /// Host issued a BOT reset; abandon any transfer in progress.
    fn reset(&mut self) {}

    /// A bulk OUT packet arrived: a CBW or a data phase chunk.
    fn received(&mut self, _core: &mut dyn UsbCore, _data: &[u8]) {}

    /// The previous bulk IN transmission finished.
    fn transmit_complete(&mut self, _core: &mut dyn UsbCore) {}
}

pub struct Msc<T: MscTransport> {
    transport: T,
    identity: ClassIdentity,
    max_packet_size: u16,
}

impl<T: MscTransport> Msc<T> {
    pub fn new(transport: T) -> Self {
        Msc {
            transport,
            identity: ClassIdentity::default(),
            max_packet_size: FS_MAX_PACKET_SIZE,
        }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    fn in_ep(&self) -> EndpointAddr {
        self.identity.in_ep(0)
    }

    fn out_ep(&self) -> EndpointAddr {
        self.identity.out_ep(0)
    }

    fn packet_size(speed: Speed) -> u16 {
        match speed {
            Speed::Full => FS_MAX_PACKET_SIZE,
            Speed::High => HS_MAX_PACKET_SIZE,
        }
    }
}

impl<T: MscTransport> ClassDriver for Msc<T> {
    fn name(&self) -> &'static str {
        "msc"
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 1,
            in_endpoints: 1,
            out_endpoints: 1,
            strings: vec![String::from("Mass Storage")],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, speed: Speed) -> Vec<u8> {
        let max_packet_size = Msc::<T>::packet_size(speed);
        let mut writer = DescriptorWriter::new();
        writer.interface(self.identity.interface(0), 0, 2, MSC_CLASS,
                         MSC_SUBCLASS_SCSI, MSC_PROTOCOL_BOT,
                         self.identity.string(0));
        writer.endpoint(self.in_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        max_packet_size, 0);
        writer.endpoint(self.out_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        max_packet_size, 0);
        writer.finish()
    }

    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        self.max_packet_size = Msc::<T>::packet_size(core.speed());
        core.open_ep(self.in_ep(), EndpointType::Bulk,
                     self.max_packet_size);
        core.open_ep(self.out_ep(), EndpointType::Bulk,
                     self.max_packet_size);
        self.transport.reset();
        core.prepare_receive(self.out_ep(), self.max_packet_size as usize);
        Ok(())
    }

    fn deinit(&mut self, core: &mut dyn UsbCore) {
        core.close_ep(self.in_ep());
        core.close_ep(self.out_ep());
    }

    fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        match fields.type_fields.request_type() {
            RequestType::Class => match fields.request {
                BOT_GET_MAX_LUN => {
                    core.ctl_send(&[self.transport.max_lun()]);
                    Ok(())
                },
                BOT_RESET => {
                    self.transport.reset();
                    core.prepare_receive(
                        self.out_ep(), self.max_packet_size as usize);
                    Ok(())
                },
                _ => Err(ClassError::Stall),
            },
            RequestType::Standard =>
                match StandardRequest::from(fields.request) {
                    StandardRequest::GetInterface => {
                        core.ctl_send(&[0]);
                        Ok(())
                    },
                    StandardRequest::SetInterface => Ok(()),
                    StandardRequest::GetStatus => {
                        core.ctl_send(&[0, 0]);
                        Ok(())
                    },
                    StandardRequest::ClearFeature => {
                        // Halt cleared on a bulk endpoint: restart the
                        // transport so a fresh CBW is expected.
                        if fields.type_fields.recipient()
                            == Recipient::Endpoint
                        {
                            core.flush_ep(fields.endpoint());
                            self.transport.reset();
                        }
                        Ok(())
                    },
                    _ => Err(ClassError::Stall),
                },
            _ => Err(ClassError::Stall),
        }
    }

    fn data_in(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep == self.in_ep().number() {
            self.transport.transmit_complete(core);
        }
        Ok(())
    }

    fn data_out(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep != self.out_ep().number() {
            return Ok(());
        }
        let mut buffer = [0u8; HS_MAX_PACKET_SIZE as usize];
        let count = core.rx_data(self.out_ep(), &mut buffer);
        self.transport.received(core, &buffer[.. count]);
        core.prepare_receive(self.out_ep(), self.max_packet_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCore;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct LogTransport {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl MscTransport for LogTransport {
        fn max_lun(&self) -> u8 {
            1
        }

        fn reset(&mut self) {
            self.log.borrow_mut().push(String::from("reset"));
        }

        fn received(&mut self, _core: &mut dyn UsbCore, data: &[u8]) {
            self.log.borrow_mut().push(format!("rx {}", data.len()));
        }

        fn transmit_complete(&mut self, _core: &mut dyn UsbCore) {
            self.log.borrow_mut().push(String::from("txc"));
        }
    }

    fn driver(core: &mut MockCore)
        -> (Msc<LogTransport>, Rc<RefCell<Vec<String>>>)
    {
        let transport = LogTransport::default();
        let log = transport.log.clone();
        let mut msc = Msc::new(transport);
        msc.assign(ClassIdentity {
            interfaces: vec![InterfaceNum(0)],
            in_endpoints: vec![EndpointAddr(0x81)],
            out_endpoints: vec![EndpointAddr(0x01)],
            strings: vec![StringId(6)],
        });
        msc.init(core).unwrap();
        (msc, log)
    }

    #[test]
    fn test_init_opens_and_arms() {
        let mut core = MockCore::new();
        let (_msc, log) = driver(&mut core);
        assert!(core.is_open(EndpointAddr(0x81)));
        assert!(core.is_open(EndpointAddr(0x01)));
        assert_eq!(core.armed.last(), Some(&(EndpointAddr(0x01), 64)));
        assert_eq!(log.borrow().as_slice(), ["reset"]);
    }

    #[test]
    fn test_get_max_lun() {
        let mut core = MockCore::new();
        let (mut msc, _log) = driver(&mut core);
        let fields = SetupFields::from_bytes(&[
            0xA1, BOT_GET_MAX_LUN, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
        msc.setup(&mut core, &fields).unwrap();
        assert_eq!(core.ep0_sent.last().unwrap(), &vec![1]);
    }

    #[test]
    fn test_bot_reset_restarts_transport() {
        let mut core = MockCore::new();
        let (mut msc, log) = driver(&mut core);
        let fields = SetupFields::from_bytes(&[
            0x21, BOT_RESET, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        msc.setup(&mut core, &fields).unwrap();
        assert_eq!(log.borrow().as_slice(), ["reset", "reset"]);
        assert_eq!(core.armed.last(), Some(&(EndpointAddr(0x01), 64)));
    }

    #[test]
    fn test_bulk_out_forwarded_and_rearmed() {
        let mut core = MockCore::new();
        let (mut msc, log) = driver(&mut core);
        let armed_before = core.armed.len();
        core.push_rx(EndpointAddr(0x01), &[0x55; 31]);
        msc.data_out(&mut core, EndpointNum(1)).unwrap();
        assert_eq!(log.borrow().last().unwrap(), "rx 31");
        assert_eq!(core.armed.len(), armed_before + 1);
    }

    #[test]
    fn test_bulk_in_completion_forwarded() {
        let mut core = MockCore::new();
        let (mut msc, log) = driver(&mut core);
        msc.data_in(&mut core, EndpointNum(1)).unwrap();
        assert_eq!(log.borrow().last().unwrap(), "txc");
    }

    #[test]
    fn test_fragment_uses_high_speed_packet_size() {
        let mut core = MockCore::new();
        let (msc, _log) = driver(&mut core);
        let fragment = msc.config_fragment(Speed::High);
        assert_eq!(fragment.len(), 9 + 7 + 7);
        assert_eq!(u16::from_le_bytes([fragment[13], fragment[14]]), 512);
        assert_eq!(u16::from_le_bytes([fragment[20], fragment[21]]), 512);
    }
}
