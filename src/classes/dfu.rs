//! Run-time DFU interface.
//!
//! Advertises detach capability alongside the other functions; the
//! actual firmware transfer happens after re-enumeration in a
//! bootloader, so this driver owns no endpoints and only tracks the
//! detach handshake.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::core::{ClassError, ClassResult, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

pub const DFU_CLASS: u8 = 0xFE;
pub const DFU_SUBCLASS: u8 = 0x01;
pub const DFU_PROTOCOL_RUNTIME: u8 = 0x01;

/// Class request codes (DFU 1.1 section 3).
pub const DFU_DETACH: u8 = 0x00;
pub const DFU_GETSTATUS: u8 = 0x03;
pub const DFU_GETSTATE: u8 = 0x05;

/// bmAttributes: will-detach, manifestation-tolerant, can-upload,
/// can-download.
const DFU_ATTRIBUTES: u8 = 0x0B;
const DETACH_TIMEOUT_MS: u16 = 255;
const TRANSFER_SIZE: u16 = 1024;

/// Run-time device states (DFU 1.1 section 4.1.1).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DfuState {
    #[default]
    AppIdle,
    AppDetach,
}

#[derive(Default)]
pub struct Dfu {
    identity: ClassIdentity,
    state: DfuState,
}

impl Dfu {
    pub fn new() -> Self {
        Dfu::default()
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    /// True once the host has requested a detach; the caller is
    /// expected to reset into the bootloader within the timeout.
    pub fn detach_requested(&self) -> bool {
        self.state == DfuState::AppDetach
    }
}

impl ClassDriver for Dfu {
    fn name(&self) -> &'static str {
        "dfu"
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 1,
            in_endpoints: 0,
            out_endpoints: 0,
            strings: vec![String::from("Firmware Update")],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, _speed: Speed) -> Vec<u8> {
        let mut writer = DescriptorWriter::new();
        writer.interface(self.identity.interface(0), 0, 0, DFU_CLASS,
                         DFU_SUBCLASS, DFU_PROTOCOL_RUNTIME,
                         self.identity.string(0));
        writer.dfu_functional(DFU_ATTRIBUTES, DETACH_TIMEOUT_MS,
                              TRANSFER_SIZE);
        writer.finish()
    }

    fn init(&mut self, _core: &mut dyn UsbCore) -> ClassResult<()> {
        self.state = DfuState::AppIdle;
        Ok(())
    }

    fn deinit(&mut self, _core: &mut dyn UsbCore) {
        self.state = DfuState::AppIdle;
    }

    fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        match fields.type_fields.request_type() {
            RequestType::Class => match fields.request {
                DFU_DETACH => {
                    self.state = DfuState::AppDetach;
                    Ok(())
                },
                DFU_GETSTATUS => {
                    // bStatus OK, zero poll timeout, state, no string.
                    core.ctl_send(&[
                        0x00, 0x00, 0x00, 0x00, self.state as u8, 0x00]);
                    Ok(())
                },
                DFU_GETSTATE => {
                    core.ctl_send(&[self.state as u8]);
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
}
