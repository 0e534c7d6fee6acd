//! USB Audio Class 1.0 definitions shared by the microphone and
//! speaker drivers.

use crate::usb::SetupFields;

pub const AUDIO_CLASS: u8 = 0x01;
pub const SUBCLASS_AUDIOCONTROL: u8 = 0x01;
pub const SUBCLASS_AUDIOSTREAMING: u8 = 0x02;
pub const PROTOCOL_UNDEFINED: u8 = 0x00;

/// Class-specific request codes (UAC 1.0 table A-9).
pub const SET_CUR: u8 = 0x01;
pub const GET_CUR: u8 = 0x81;
pub const GET_MIN: u8 = 0x82;
pub const GET_MAX: u8 = 0x83;
pub const GET_RES: u8 = 0x84;

/// Terminal types (UAC termt10 tables 2-1 and 2-2).
pub const TERMINAL_USB_STREAMING: u16 = 0x0101;
pub const TERMINAL_MICROPHONE: u16 = 0x0201;
pub const TERMINAL_SPEAKER: u16 = 0x0301;

/// Feature unit control bits.
pub const CONTROL_MUTE: u8 = 0x01;
pub const CONTROL_VOLUME: u8 = 0x02;

/// A SET_CUR whose data stage has not arrived yet.
///
/// The request names its target unit in the high byte of wIndex; the
/// value bytes follow on EP0 and are dispatched from the RxReady
/// event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendingSetCur {
    pub unit: u8,
    pub selector: u8,
    pub length: u16,
}

impl PendingSetCur {
    pub fn from_setup(fields: &SetupFields) -> Self {
        PendingSetCur {
            unit: fields.entity(),
            selector: (fields.value >> 8) as u8,
            length: fields.length,
        }
    }
}
