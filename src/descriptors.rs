//! Typed construction of configuration descriptor fragments.
//!
//! Class drivers build their slice of the configuration with a
//! [`DescriptorWriter`] carrying their assigned numbers in named
//! fields, instead of patching fixed byte offsets in a canned table.

use crate::usb::prelude::*;

/// Class-specific interface descriptor type (CS_INTERFACE).
pub const CS_INTERFACE: u8 = 0x24;
/// Class-specific endpoint descriptor type (CS_ENDPOINT).
pub const CS_ENDPOINT: u8 = 0x25;

/// Audio Control interface descriptor subtypes (UAC 1.0 table A-5).
pub mod ac_subtype {
    pub const HEADER: u8 = 0x01;
    pub const INPUT_TERMINAL: u8 = 0x02;
    pub const OUTPUT_TERMINAL: u8 = 0x03;
    pub const FEATURE_UNIT: u8 = 0x06;
}

/// Audio Streaming interface descriptor subtypes (UAC 1.0 table A-6).
pub mod as_subtype {
    pub const GENERAL: u8 = 0x01;
    pub const FORMAT_TYPE: u8 = 0x02;
}

/// CDC functional descriptor subtypes (CDC 1.2 table 13).
pub mod cdc_subtype {
    pub const HEADER: u8 = 0x00;
    pub const CALL_MANAGEMENT: u8 = 0x01;
    pub const ACM: u8 = 0x02;
    pub const UNION: u8 = 0x06;
}

/// Accumulates descriptor bytes for one class's configuration fragment.
#[derive(Default)]
pub struct DescriptorWriter {
    bytes: Vec<u8>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Append raw descriptor bytes already carrying their own header.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn interface_association(&mut self,
                                 first_interface: InterfaceNum,
                                 interface_count: u8,
                                 function_class: u8,
                                 function_subclass: u8,
                                 function_protocol: u8,
                                 function_str_id: StringId)
    {
        self.raw(InterfaceAssocDescriptor {
            length: 8,
            descriptor_type: DescriptorType::InterfaceAssociation.into(),
            first_interface,
            interface_count,
            function_class,
            function_subclass,
            function_protocol,
            function_str_id,
        }.bytes());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn interface(&mut self,
                     interface_number: InterfaceNum,
                     alternate_setting: u8,
                     num_endpoints: u8,
                     interface_class: u8,
                     interface_subclass: u8,
                     interface_protocol: u8,
                     interface_str_id: StringId)
    {
        self.raw(InterfaceDescriptor {
            length: 9,
            descriptor_type: DescriptorType::Interface.into(),
            interface_number,
            alternate_setting,
            num_endpoints,
            interface_class,
            interface_subclass,
            interface_protocol,
            interface_str_id,
        }.bytes());
    }

    pub fn endpoint(&mut self,
                    endpoint_address: EndpointAddr,
                    attributes: EndpointAttr,
                    max_packet_size: u16,
                    interval: u8)
    {
        self.raw(EndpointDescriptor {
            length: 7,
            descriptor_type: DescriptorType::Endpoint.into(),
            endpoint_address,
            attributes,
            max_packet_size,
            interval,
        }.bytes());
    }

    /// Nine-byte audio endpoint descriptor: the standard seven bytes
    /// extended with bRefresh and bSynchAddress, both zero for the
    /// adaptive streams built here.
    pub fn iso_audio_endpoint(&mut self,
                              endpoint_address: EndpointAddr,
                              attributes: EndpointAttr,
                              max_packet_size: u16,
                              interval: u8)
    {
        let size = max_packet_size.to_le_bytes();
        self.raw(&[
            9,
            DescriptorType::Endpoint.into(),
            endpoint_address.into(),
            attributes.into(),
            size[0], size[1],
            interval,
            0x00,
            0x00,
        ]);
    }

    /// Class-specific AS isochronous endpoint descriptor, with no lock
    /// delay.
    pub fn as_endpoint_general(&mut self) {
        self.raw(&[7, CS_ENDPOINT, as_subtype::GENERAL,
                   0x00, 0x00, 0x00, 0x00]);
    }

    /// Class-specific AC header. `total_length` covers the header and
    /// every unit and terminal descriptor that follows it.
    pub fn ac_header(&mut self,
                     total_length: u16,
                     streaming_interface: InterfaceNum)
    {
        let total = total_length.to_le_bytes();
        self.raw(&[
            9, CS_INTERFACE, ac_subtype::HEADER,
            0x00, 0x01,                  // bcdADC 1.00
            total[0], total[1],
            0x01,                        // bInCollection
            streaming_interface.into(),
        ]);
    }

    pub fn input_terminal(&mut self,
                          terminal_id: u8,
                          terminal_type: u16,
                          channels: u8,
                          channel_config: u16)
    {
        let term = terminal_type.to_le_bytes();
        let config = channel_config.to_le_bytes();
        self.raw(&[
            12, CS_INTERFACE, ac_subtype::INPUT_TERMINAL,
            terminal_id,
            term[0], term[1],
            0x00,                        // bAssocTerminal
            channels,
            config[0], config[1],
            0x00,                        // iChannelNames
            0x00,                        // iTerminal
        ]);
    }

    pub fn output_terminal(&mut self,
                           terminal_id: u8,
                           terminal_type: u16,
                           source_id: u8)
    {
        let term = terminal_type.to_le_bytes();
        self.raw(&[
            9, CS_INTERFACE, ac_subtype::OUTPUT_TERMINAL,
            terminal_id,
            term[0], term[1],
            0x00,                        // bAssocTerminal
            source_id,
            0x00,                        // iTerminal
        ]);
    }

    /// Feature unit with one control byte per logical channel plus the
    /// master channel, hence `7 + channels + 1` bytes total.
    pub fn feature_unit(&mut self,
                        unit_id: u8,
                        source_id: u8,
                        controls: &[u8])
    {
        self.bytes.push(7 + controls.len() as u8);
        self.raw(&[CS_INTERFACE, ac_subtype::FEATURE_UNIT,
                   unit_id, source_id,
                   0x01]);                // bControlSize
        self.raw(controls);
        self.bytes.push(0x00);            // iFeature
    }

    /// Class-specific AS general descriptor, PCM format.
    pub fn as_general(&mut self, terminal_link: u8, delay: u8) {
        self.raw(&[7, CS_INTERFACE, as_subtype::GENERAL,
                   terminal_link, delay,
                   0x01, 0x00]);          // wFormatTag PCM
    }

    /// Type I format descriptor for 16-bit samples at one discrete
    /// frequency.
    pub fn format_type_i(&mut self, channels: u8, frequency: u32) {
        self.raw(&[
            11, CS_INTERFACE, as_subtype::FORMAT_TYPE,
            0x01,                        // bFormatType Type I
            channels,
            0x02,                        // bSubFrameSize
            16,                          // bBitResolution
            0x01,                        // bSamFreqType
            frequency as u8,
            (frequency >> 8) as u8,
            (frequency >> 16) as u8,
        ]);
    }

    pub fn cdc_header(&mut self) {
        self.raw(&[5, CS_INTERFACE, cdc_subtype::HEADER,
                   0x10, 0x01]);          // bcdCDC 1.10
    }

    pub fn cdc_call_management(&mut self, data_interface: InterfaceNum) {
        self.raw(&[5, CS_INTERFACE, cdc_subtype::CALL_MANAGEMENT,
                   0x00,                  // bmCapabilities
                   data_interface.into()]);
    }

    pub fn cdc_acm(&mut self) {
        self.raw(&[4, CS_INTERFACE, cdc_subtype::ACM,
                   0x02]);                // line coding + serial state
    }

    pub fn cdc_union(&mut self, master: InterfaceNum, slave: InterfaceNum) {
        self.raw(&[5, CS_INTERFACE, cdc_subtype::UNION,
                   master.into(), slave.into()]);
    }

    /// HID class descriptor announcing a single report descriptor.
    pub fn hid(&mut self, country_code: u8, report_desc_length: u16) {
        let len = report_desc_length.to_le_bytes();
        self.raw(&[
            9, 0x21,                     // HID descriptor
            0x11, 0x01,                  // bcdHID 1.11
            country_code,
            0x01,                        // bNumDescriptors
            0x22,                        // report descriptor follows
            len[0], len[1],
        ]);
    }

    /// Run-time DFU functional descriptor.
    pub fn dfu_functional(&mut self,
                          attributes: u8,
                          detach_timeout_ms: u16,
                          transfer_size: u16)
    {
        let timeout = detach_timeout_ms.to_le_bytes();
        let size = transfer_size.to_le_bytes();
        self.raw(&[
            9, 0x21,                     // DFU functional
            attributes,
            timeout[0], timeout[1],
            size[0], size[1],
            0x1A, 0x01,                  // bcdDFUVersion 1.1a
        ]);
    }
}

/// Isochronous audio packet bytes per millisecond frame.
pub fn audio_packet_size(frequency: u32, channels: u8) -> u16 {
    (frequency / 1000) as u16 * channels as u16 * 2
}

/// Endpoint wMaxPacketSize for an adaptive audio stream: the nominal
/// per-frame payload plus one sample pair of enlargement headroom.
pub fn audio_max_packet_size(frequency: u32, channels: u8) -> u16 {
    (frequency / 1000 + 2) as u16 * channels as u16 * 2
}
