//! CDC-ACM virtual serial port.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::core::{ClassError, ClassResult, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

pub const CDC_CLASS: u8 = 0x02;
pub const CDC_SUBCLASS_ACM: u8 = 0x02;
pub const CDC_PROTOCOL_AT: u8 = 0x01;
pub const CDC_DATA_CLASS: u8 = 0x0A;

/// Class request codes (CDC PSTN 1.2 table 13).
pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

const NOTIFICATION_PACKET_SIZE: u16 = 8;
const FS_PACKET_SIZE: u16 = 64;
const HS_PACKET_SIZE: u16 = 512;
const NOTIFICATION_INTERVAL: u8 = 0x10;

/// Serial line parameters carried by SET/GET_LINE_CODING.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineCoding {
    pub bit_rate: u32,
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            bit_rate: 115_200,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    fn from_bytes(bytes: &[u8; 7]) -> Self {
        LineCoding {
            bit_rate: u32::from_le_bytes(
                [bytes[0], bytes[1], bytes[2], bytes[3]]),
            stop_bits: bytes[4],
            parity: bytes[5],
            data_bits: bytes[6],
        }
    }

    fn to_bytes(self) -> [u8; 7] {
        let rate = self.bit_rate.to_le_bytes();
        [rate[0], rate[1], rate[2], rate[3],
         self.stop_bits, self.parity, self.data_bits]
    }
}

pub trait CdcAcmHandler {
    fn line_coding_changed(&mut self, coding: &LineCoding);

    fn control_line_state(&mut self, dtr: bool, rts: bool);

    /// Bytes arrived on the bulk OUT endpoint.
    fn received(&mut self, data: &[u8]);

    /// A transmit begun with [`CdcAcm::transmit`] fully completed.
    fn transmit_complete(&mut self);
}

pub struct CdcAcm<H: CdcAcmHandler> {
    handler: H,
    identity: ClassIdentity,
    line_coding: LineCoding,
    max_packet_size: u16,
    tx_busy: bool,
    /// A full-packet transmit must be terminated by a zero length
    /// packet so the host does not wait for more data.
    zlp_pending: bool,
    coding_pending: bool,
}

impl<H: CdcAcmHandler> CdcAcm<H> {
    pub fn new(handler: H) -> Self {
        CdcAcm {
            handler,
            identity: ClassIdentity::default(),
            line_coding: LineCoding::default(),
            max_packet_size: FS_PACKET_SIZE,
            tx_busy: false,
            zlp_pending: false,
            coding_pending: false,
        }
    }

    fn data_in_ep(&self) -> EndpointAddr {
        self.identity.in_ep(0)
    }

    fn notification_ep(&self) -> EndpointAddr {
        self.identity.in_ep(1)
    }

    fn data_out_ep(&self) -> EndpointAddr {
        self.identity.out_ep(0)
    }

    pub fn line_coding(&self) -> &LineCoding {
        &self.line_coding
    }

    /// Queue bytes for the host. Refused while a previous transmit is
    /// still in flight.
    pub fn transmit(&mut self, core: &mut dyn UsbCore, data: &[u8])
        -> ClassResult<()>
    {
        if self.tx_busy {
            return Err(ClassError::Busy);
        }
        self.tx_busy = true;
        self.zlp_pending =
            !data.is_empty() && data.len() % self.max_packet_size as usize == 0;
        core.transmit(self.data_in_ep(), data);
        Ok(())
    }
}

impl<H: CdcAcmHandler> ClassDriver for CdcAcm<H> {
    fn name(&self) -> &'static str {
        "cdc-acm"
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 2,
            in_endpoints: 2,
            out_endpoints: 1,
            strings: vec![String::from("CDC ACM")],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, speed: Speed) -> Vec<u8> {
        let comm_itf = self.identity.interface(0);
        let data_itf = self.identity.interface(1);
        let data_packet_size = match speed {
            Speed::Full => FS_PACKET_SIZE,
            Speed::High => HS_PACKET_SIZE,
        };

        let mut writer = DescriptorWriter::new();
        writer.interface_association(
            comm_itf, 2, CDC_CLASS, CDC_SUBCLASS_ACM, CDC_PROTOCOL_AT,
            StringId(0));
        writer.interface(comm_itf, 0, 1, CDC_CLASS, CDC_SUBCLASS_ACM,
                         CDC_PROTOCOL_AT, self.identity.string(0));
        writer.cdc_header();
        writer.cdc_call_management(data_itf);
        writer.cdc_acm();
        writer.cdc_union(comm_itf, data_itf);
        writer.endpoint(self.notification_ep(),
                        EndpointAttr(EndpointType::Interrupt as u8),
                        NOTIFICATION_PACKET_SIZE, NOTIFICATION_INTERVAL);
        writer.interface(data_itf, 0, 2, CDC_DATA_CLASS, 0, 0, StringId(0));
        writer.endpoint(self.data_out_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        data_packet_size, 0);
        writer.endpoint(self.data_in_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        data_packet_size, 0);
        writer.finish()
    }

    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        self.max_packet_size = match core.speed() {
            Speed::Full => FS_PACKET_SIZE,
            Speed::High => HS_PACKET_SIZE,
        };
        core.open_ep(self.data_in_ep(), EndpointType::Bulk,
                     self.max_packet_size);
        core.open_ep(self.data_out_ep(), EndpointType::Bulk,
                     self.max_packet_size);
        core.open_ep(self.notification_ep(), EndpointType::Interrupt,
                     NOTIFICATION_PACKET_SIZE);
        self.tx_busy = false;
        self.zlp_pending = false;
        core.prepare_receive(self.data_out_ep(),
                             self.max_packet_size as usize);
        Ok(())
    }

    fn deinit(&mut self, core: &mut dyn UsbCore) {
        core.close_ep(self.data_in_ep());
        core.close_ep(self.data_out_ep());
        core.close_ep(self.notification_ep());
        self.tx_busy = false;
        self.zlp_pending = false;
    }

    fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        if fields.type_fields.request_type() != RequestType::Class {
            return Err(ClassError::Stall);
        }
        match fields.request {
            SET_LINE_CODING => {
                if fields.length as usize >= 7 {
                    core.ctl_receive(7);
                    self.coding_pending = true;
                }
                Ok(())
            },
            GET_LINE_CODING => {
                core.ctl_send(&self.line_coding.to_bytes());
                Ok(())
            },
            SET_CONTROL_LINE_STATE => {
                let dtr = fields.value & 0x01 != 0;
                let rts = fields.value & 0x02 != 0;
                self.handler.control_line_state(dtr, rts);
                Ok(())
            },
            SEND_BREAK => Ok(()),
            _ => Err(ClassError::Stall),
        }
    }

    fn data_in(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep != self.data_in_ep().number() {
            return Ok(());
        }
        if self.zlp_pending {
            self.zlp_pending = false;
            core.transmit(self.data_in_ep(), &[]);
        } else if self.tx_busy {
            self.tx_busy = false;
            self.handler.transmit_complete();
        }
        Ok(())
    }

    fn data_out(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep != self.data_out_ep().number() {
            return Ok(());
        }
        let mut buffer = [0u8; HS_PACKET_SIZE as usize];
        let len = core.rx_data(self.data_out_ep(), &mut buffer);
        self.handler.received(&buffer[.. len]);
        core.prepare_receive(self.data_out_ep(),
                             self.max_packet_size as usize);
        Ok(())
    }

    fn ep0_rx_ready(&mut self, core: &mut dyn UsbCore) {
        if !self.coding_pending {
            return;
        }
        self.coding_pending = false;
        let mut bytes = [0u8; 7];
        if core.ctl_rx_data(&mut bytes) == 7 {
            self.line_coding = LineCoding::from_bytes(&bytes);
            self.handler.line_coding_changed(&self.line_coding);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::testing::MockCore;

    #[derive(Default)]
    struct Log {
        codings: Vec<LineCoding>,
        lines: Vec<(bool, bool)>,
        received: Vec<Vec<u8>>,
        tx_complete: u32,
    }

    #[derive(Clone, Default)]
    struct LogHandler(Rc<RefCell<Log>>);

    impl CdcAcmHandler for LogHandler {
        fn line_coding_changed(&mut self, coding: &LineCoding) {
            self.0.borrow_mut().codings.push(*coding);
        }
        fn control_line_state(&mut self, dtr: bool, rts: bool) {
            self.0.borrow_mut().lines.push((dtr, rts));
        }
        fn received(&mut self, data: &[u8]) {
            self.0.borrow_mut().received.push(data.to_vec());
        }
        fn transmit_complete(&mut self) {
            self.0.borrow_mut().tx_complete += 1;
        }
    }

    fn cdc(core: &mut MockCore) -> (CdcAcm<LogHandler>, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut cdc = CdcAcm::new(LogHandler(log.clone()));
        cdc.assign(ClassIdentity {
            interfaces: vec![InterfaceNum(0), InterfaceNum(1)],
            in_endpoints: vec![EndpointAddr(0x81), EndpointAddr(0x82)],
            out_endpoints: vec![EndpointAddr(0x01)],
            strings: vec![StringId(6)],
        });
        cdc.init(core).unwrap();
        (cdc, log)
    }

    #[test]
    fn test_fragment_is_one_function_block() {
        let mut core = MockCore::new();
        let (cdc, _log) = cdc(&mut core);
        // IAD + comm interface + functional block + notification
        // endpoint + data interface + two bulk endpoints.
        let fragment = cdc.config_fragment(Speed::Full);
        assert_eq!(fragment.len(), 66);
        // High speed uses 512 byte bulk packets. The bulk OUT and IN
        // descriptors sit at offsets 52 and 59 in the fragment.
        let hs = cdc.config_fragment(Speed::High);
        assert_eq!(u16::from_le_bytes([hs[56], hs[57]]), 512);
        assert_eq!(u16::from_le_bytes([hs[63], hs[64]]), 512);
    }

    #[test]
    fn test_transmit_busy_until_complete() {
        let mut core = MockCore::new();
        let (mut cdc, log) = cdc(&mut core);

        cdc.transmit(&mut core, b"hello").unwrap();
        assert_eq!(cdc.transmit(&mut core, b"again"),
                   Err(ClassError::Busy));

        cdc.data_in(&mut core, EndpointNum(1)).unwrap();
        assert_eq!(log.borrow().tx_complete, 1);
        cdc.transmit(&mut core, b"again").unwrap();
    }

    #[test]
    fn test_full_packet_transmit_appends_zlp() {
        let mut core = MockCore::new();
        let (mut cdc, log) = cdc(&mut core);

        let data = vec![0xAAu8; 64];
        cdc.transmit(&mut core, &data).unwrap();
        cdc.data_in(&mut core, EndpointNum(1)).unwrap();
        // Still busy: the zero length packet is in flight.
        assert_eq!(log.borrow().tx_complete, 0);
        assert_eq!(core.last_transmitted(EndpointAddr(0x81)).unwrap().len(),
                   0);

        cdc.data_in(&mut core, EndpointNum(1)).unwrap();
        assert_eq!(log.borrow().tx_complete, 1);
    }

    #[test]
    fn test_receive_forwards_and_rearms() {
        let mut core = MockCore::new();
        let (mut cdc, log) = cdc(&mut core);

        core.push_rx(EndpointAddr(0x01), b"abc");
        cdc.data_out(&mut core, EndpointNum(1)).unwrap();
        assert_eq!(log.borrow().received, vec![b"abc".to_vec()]);
        assert_eq!(core.armed.len(), 2);
    }

    #[test]
    fn test_line_coding_round_trip() {
        let mut core = MockCore::new();
        let (mut cdc, log) = cdc(&mut core);

        let fields = SetupFields::from_bytes(&[
            0x21, SET_LINE_CODING, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
        cdc.setup(&mut core, &fields).unwrap();
        core.push_ep0_rx(&[0x00, 0xC2, 0x01, 0x00, 0, 0, 8]);
        cdc.ep0_rx_ready(&mut core);
        let expected = LineCoding {
            bit_rate: 115_200, stop_bits: 0, parity: 0, data_bits: 8 };
        assert_eq!(log.borrow().codings, vec![expected]);

        let fields = SetupFields::from_bytes(&[
            0xA1, GET_LINE_CODING, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
        cdc.setup(&mut core, &fields).unwrap();
        assert_eq!(core.ep0_sent.last().unwrap(),
                   &expected.to_bytes().to_vec());
    }

    #[test]
    fn test_control_line_state_is_immediate() {
        let mut core = MockCore::new();
        let (mut cdc, log) = cdc(&mut core);

        let fields = SetupFields::from_bytes(&[
            0x21, SET_CONTROL_LINE_STATE, 0x03, 0x00, 0x00, 0x00,
            0x00, 0x00]);
        cdc.setup(&mut core, &fields).unwrap();
        assert_eq!(log.borrow().lines, vec![(true, true)]);
    }
}
