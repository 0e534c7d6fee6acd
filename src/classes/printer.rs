//! Bidirectional printer class.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::core::{ClassError, ClassResult, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

pub const PRINTER_CLASS: u8 = 0x07;
pub const PRINTER_SUBCLASS: u8 = 0x01;
pub const PRINTER_PROTOCOL_BIDIRECTIONAL: u8 = 0x02;

/// Class request codes (printer class 1.1 section 4.2).
pub const GET_DEVICE_ID: u8 = 0x00;
pub const GET_PORT_STATUS: u8 = 0x01;
pub const SOFT_RESET: u8 = 0x02;

/// Port status bits: paper not empty, selected, no error.
const PORT_STATUS_READY: u8 = 0x18;

const FS_MAX_PACKET_SIZE: u16 = 64;
const HS_MAX_PACKET_SIZE: u16 = 512;

pub trait PrinterHandler {
    /// Print data arrived on the bulk OUT endpoint.
    fn received(&mut self, _data: &[u8]) {}

    /// Host issued a soft reset.
    fn reset(&mut self) {}
}

pub struct Printer<H: PrinterHandler> {
    handler: H,
    device_id: String,
    identity: ClassIdentity,
    max_packet_size: u16,
}

impl<H: PrinterHandler> Printer<H> {
    /// `device_id` is the IEEE 1284 capabilities string, without the
    /// length prefix, e.g. `"MFG:Acme;MDL:Widget;CLS:PRINTER;"`.
    pub fn new(handler: H, device_id: &str) -> Self {
        Printer {
            handler,
            device_id: String::from(device_id),
            identity: ClassIdentity::default(),
            max_packet_size: FS_MAX_PACKET_SIZE,
        }
    }

    pub fn handler(&mut self) -> &mut H {
        &mut self.handler
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

    /// Device ID as sent on the wire: big-endian total length followed
    /// by the capabilities string.
    fn device_id_bytes(&self) -> Vec<u8> {
        let total = (self.device_id.len() + 2) as u16;
        let mut bytes = Vec::with_capacity(total as usize);
        bytes.extend_from_slice(&total.to_be_bytes());
        bytes.extend_from_slice(self.device_id.as_bytes());
        bytes
    }
}

impl<H: PrinterHandler> ClassDriver for Printer<H> {
    fn name(&self) -> &'static str {
        "printer"
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 1,
            in_endpoints: 1,
            out_endpoints: 1,
            strings: vec![String::from("Printer")],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, speed: Speed) -> Vec<u8> {
        let max_packet_size = Printer::<H>::packet_size(speed);
        let mut writer = DescriptorWriter::new();
        writer.interface(self.identity.interface(0), 0, 2, PRINTER_CLASS,
                         PRINTER_SUBCLASS,
                         PRINTER_PROTOCOL_BIDIRECTIONAL,
                         self.identity.string(0));
        writer.endpoint(self.out_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        max_packet_size, 0);
        writer.endpoint(self.in_ep(),
                        EndpointAttr(EndpointType::Bulk as u8),
                        max_packet_size, 0);
        writer.finish()
    }

    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        self.max_packet_size = Printer::<H>::packet_size(core.speed());
        core.open_ep(self.in_ep(), EndpointType::Bulk,
                     self.max_packet_size);
        core.open_ep(self.out_ep(), EndpointType::Bulk,
                     self.max_packet_size);
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
                GET_DEVICE_ID => {
                    let bytes = self.device_id_bytes();
                    let len = bytes.len().min(fields.length as usize);
                    core.ctl_send(&bytes[.. len]);
                    Ok(())
                },
                GET_PORT_STATUS => {
                    core.ctl_send(&[PORT_STATUS_READY]);
                    Ok(())
                },
                SOFT_RESET => {
                    core.flush_ep(self.out_ep());
                    self.handler.reset();
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
                    _ => Err(ClassError::Stall),
                },
            _ => Err(ClassError::Stall),
        }
    }

    fn data_out(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep != self.out_ep().number() {
            return Ok(());
        }
        let mut buffer = [0u8; HS_MAX_PACKET_SIZE as usize];
        let count = core.rx_data(self.out_ep(), &mut buffer);
        self.handler.received(&buffer[.. count]);
        core.prepare_receive(self.out_ep(), self.max_packet_size as usize);
        Ok(())
    }
}
