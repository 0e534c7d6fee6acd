//! Shared USB 2.0 vocabulary: identity newtypes, control requests and
//! standard descriptors.
//!
//! Descriptor structs serialize with [`bytemuck`] for the device side and
//! parse back with [`pod_read_unaligned`] so tests can walk an assembled
//! configuration exactly as a host enumerating the device would.

use std::mem::size_of;

use bytemuck_derive::{Pod, Zeroable};
use bytemuck::{bytes_of, pod_read_unaligned};
use num_enum::{IntoPrimitive, FromPrimitive};
use derive_more::{From, Into, Display};

use crate::vec_map::VecMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Hash,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct InterfaceNum(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct StringId(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct EndpointNum(pub u8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Hash,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct EndpointAddr(pub u8);

impl EndpointAddr {
    pub fn number(&self) -> EndpointNum {
        EndpointNum(self.0 & 0x7F)
    }

    pub fn direction(&self) -> Direction {
        if self.0 & 0x80 == 0 {
            Direction::Out
        } else {
            Direction::In
        }
    }

    pub fn from_parts(number: EndpointNum, direction: Direction) -> Self {
        EndpointAddr((direction as u8) << 7 | number.0 & 0x7F)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default,
         Pod, Zeroable, From, Into, Display)]
#[repr(transparent)]
pub struct EndpointAttr(pub u8);

impl EndpointAttr {
    pub fn endpoint_type(&self) -> EndpointType {
        EndpointType::from(self.0 & 0x03)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EndpointType {
    #[default]
    Control     = 0,
    Isochronous = 1,
    Bulk        = 2,
    Interrupt   = 3,
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Isochronous => write!(f, "isochronous"),
            Self::Bulk => write!(f, "bulk"),
            Self::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Bus speeds a device-mode controller can run at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Speed {
    Full,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Out = 0,
    In = 1,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", match self {
            Direction::In  => "IN",
            Direction::Out => "OUT"})
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    #[default]
    Reserved = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    #[default]
    Reserved = 4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
    #[default]
    Unknown = 13,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    InterfaceAssociation = 11,
    #[default]
    Unknown = 9,
}

impl DescriptorType {
    fn expected_length(&self) -> Option<usize> {
        use DescriptorType::*;
        match self {
            Device =>
                Some(size_of::<DeviceDescriptor>()),
            Configuration =>
                Some(size_of::<ConfigDescriptor>()),
            Interface =>
                Some(size_of::<InterfaceDescriptor>()),
            Endpoint =>
                Some(size_of::<EndpointDescriptor>()),
            _ =>
                None
        }
    }
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
    #[repr(C)]
    pub struct RequestTypeFields(u8);
    pub u8, into Recipient, recipient, _: 4, 0;
    pub u8, into RequestType, request_type, _: 6, 5;
    pub u8, into Direction, direction, _: 7, 7;
}

impl RequestTypeFields {
    pub fn from_parts(direction: Direction, request_type: RequestType,
                      recipient: Recipient) -> Self
    {
        RequestTypeFields(
            (direction as u8) << 7 |
            (request_type as u8) << 5 |
            recipient as u8)
    }
}

/// The eight bytes of a control transfer's setup stage.
#[derive(Copy, Clone, Debug)]
pub struct SetupFields {
    pub type_fields: RequestTypeFields,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupFields {
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        SetupFields {
            type_fields: RequestTypeFields(bytes[0]),
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [self.type_fields.0, self.request,
         value[0], value[1], index[0], index[1], length[0], length[1]]
    }

    /// Interface number carried in wIndex.
    ///
    /// Only the low byte identifies the interface; hosts put
    /// unit/entity ids in the high byte for class requests, so routing
    /// must ignore it.
    pub fn interface(&self) -> InterfaceNum {
        InterfaceNum(self.index as u8)
    }

    /// Entity (unit or terminal) id carried in the high byte of wIndex.
    pub fn entity(&self) -> u8 {
        (self.index >> 8) as u8
    }

    pub fn endpoint(&self) -> EndpointAddr {
        EndpointAddr(self.index as u8)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BCDVersion {
    pub minor: u8,
    pub major: u8,
}

impl std::fmt::Display for BCDVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:X}.{:02X}", self.major, self.minor)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: BCDVersion,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: BCDVersion,
    pub manufacturer_str_id: StringId,
    pub product_str_id: StringId,
    pub serial_str_id: StringId,
    pub num_configurations: u8
}

impl DeviceDescriptor {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        pod_read_unaligned::<DeviceDescriptor>(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DeviceQualifierDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: BCDVersion,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub num_configurations: u8,
    pub reserved: u8,
}

impl DeviceQualifierDescriptor {
    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C, packed)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub config_value: u8,
    pub config_str_id: StringId,
    pub attributes: u8,
    pub max_power: u8
}

impl ConfigDescriptor {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        pod_read_unaligned::<ConfigDescriptor>(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C, packed)]
pub struct InterfaceAssocDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub first_interface: InterfaceNum,
    pub interface_count: u8,
    pub function_class: u8,
    pub function_subclass: u8,
    pub function_protocol: u8,
    pub function_str_id: StringId,
}

impl InterfaceAssocDescriptor {
    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C, packed)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: InterfaceNum,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_str_id: StringId,
}

impl InterfaceDescriptor {
    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
#[repr(C, packed)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: EndpointAddr,
    pub attributes: EndpointAttr,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn bytes(&self) -> &[u8] {
        bytes_of(self)
    }
}

pub enum Descriptor {
    Device(DeviceDescriptor),
    Configuration(ConfigDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    Other(DescriptorType)
}

/// Walks a descriptor buffer by each descriptor's own bLength field.
pub struct DescriptorIterator<'bytes> {
    bytes: &'bytes [u8],
    offset: usize,
}

impl<'bytes> DescriptorIterator<'bytes> {
    pub fn from(bytes: &'bytes [u8]) -> Self {
        DescriptorIterator {
            bytes,
            offset: 0
        }
    }

    /// Bytes consumed so far; after exhaustion this must equal the
    /// buffer length for a well-formed configuration.
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl Iterator for DescriptorIterator<'_> {
    type Item = Descriptor;

    fn next(&mut self) -> Option<Descriptor> {
        while self.offset + 2 <= self.bytes.len() {
            let remaining_bytes = &self.bytes[self.offset .. self.bytes.len()];
            let desc_length = remaining_bytes[0] as usize;
            let desc_type = DescriptorType::from(remaining_bytes[1]);
            if desc_length < 2 || desc_length > remaining_bytes.len() {
                // Truncated or corrupt; stop rather than overrun.
                return None;
            }
            self.offset += desc_length;
            let mut bytes = &remaining_bytes[0 .. desc_length];
            match desc_type.expected_length() {
                // Audio endpoint descriptors carry bRefresh and
                // bSynchAddress after the standard seven bytes.
                Some(expected) if desc_type == DescriptorType::Endpoint
                    && desc_length == expected + 2 =>
                        bytes = &bytes[0 .. expected],
                Some(expected) if desc_length != expected => continue,
                _ => {}
            }
            return Some(match desc_type {
                DescriptorType::Device =>
                    Descriptor::Device(
                        DeviceDescriptor::from_bytes(bytes)),
                DescriptorType::Configuration =>
                    Descriptor::Configuration(
                        pod_read_unaligned::<ConfigDescriptor>(bytes)),
                DescriptorType::Interface =>
                    Descriptor::Interface(
                        pod_read_unaligned::<InterfaceDescriptor>(bytes)),
                DescriptorType::Endpoint =>
                    Descriptor::Endpoint(
                        pod_read_unaligned::<EndpointDescriptor>(bytes)),
                _ => Descriptor::Other(desc_type)
            });
        }
        None
    }
}

pub struct Interface {
    pub descriptor: InterfaceDescriptor,
    pub endpoint_descriptors: Vec<EndpointDescriptor>,
}

/// A configuration reassembled from descriptor bytes, as a host sees it.
pub struct Configuration {
    pub descriptor: ConfigDescriptor,
    pub interfaces: VecMap<InterfaceNum, Interface>,
}

impl Configuration {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut result: Option<Configuration> = None;
        let mut iface_num: Option<InterfaceNum> = None;
        for descriptor in DescriptorIterator::from(bytes) {
            match descriptor {
                Descriptor::Configuration(config_desc) => {
                    result = Some(Configuration {
                        descriptor: config_desc,
                        interfaces:
                            VecMap::with_capacity(
                                config_desc.num_interfaces),
                    });
                },
                Descriptor::Interface(iface_desc) => {
                    if let Some(config) = result.as_mut() {
                        iface_num = Some(iface_desc.interface_number);
                        // Alternate settings share the number slot; the
                        // default setting registers the interface.
                        if iface_desc.alternate_setting == 0 {
                            config.interfaces.set(
                                iface_desc.interface_number,
                                Interface {
                                    descriptor: iface_desc,
                                    endpoint_descriptors: Vec::new(),
                                }
                            );
                        }
                    }
                },
                Descriptor::Endpoint(ep_desc) => {
                    if let Some(config) = result.as_mut() {
                        if let Some(num) = iface_num {
                            if let Some(iface) =
                                config.interfaces.get_mut(num)
                            {
                                iface.endpoint_descriptors.push(ep_desc);
                            }
                        }
                    }
                },
                _ => {},
            };
        }
        result
    }

    /// Every direction-qualified endpoint address in the configuration,
    /// in descriptor order.
    pub fn endpoint_addresses(&self) -> Vec<EndpointAddr> {
        let mut addresses = Vec::new();
        for iface in &self.interfaces {
            for ep in &iface.endpoint_descriptors {
                addresses.push(ep.endpoint_address);
            }
        }
        addresses
    }
}


pub mod prelude {
    #[allow(unused_imports)]
    pub use super::{
        SetupFields,
        RequestTypeFields,
        Speed,
        Direction,
        EndpointAddr,
        EndpointAttr,
        EndpointNum,
        EndpointType,
        StandardRequest,
        RequestType,
        Recipient,
        DescriptorType,
        DeviceDescriptor,
        DeviceQualifierDescriptor,
        ConfigDescriptor,
        InterfaceAssocDescriptor,
        InterfaceDescriptor,
        EndpointDescriptor,
        Configuration,
        Interface,
        InterfaceNum,
        StringId,
        BCDVersion,
    };
}
