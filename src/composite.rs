//! Composite device assembly and event dispatch.
//!
//! The mounter takes a list of class drivers, grants each one a block
//! of interface numbers, endpoint addresses and string indices, and
//! concatenates their descriptor fragments into one configuration per
//! bus speed. The dispatcher then routes every bus event to the driver
//! owning the addressed interface or endpoint.

use anyhow::{Context, Error, bail, ensure};
use itertools::Itertools;
use log::warn;

use crate::class::{ClassDriver, ClassIdentity};
use crate::core::{ClassError, ClassResult, UsbCore};
use crate::usb::prelude::*;
use crate::usb::{Descriptor, DescriptorIterator};
use crate::vec_map::VecMap;

/// Endpoint numbers run 1..=15 in each direction; 0 is the control
/// pipe.
const MAX_ENDPOINT_NUM: u8 = 15;

/// First string index handed to class drivers, after the slots the
/// device-level strings occupy.
pub const DEFAULT_STRING_INDEX_BASE: u8 = 6;

const LANGID_EN_US: u16 = 0x0409;

/// Device-level identity and power configuration.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: BCDVersion,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub self_powered: bool,
    pub remote_wakeup: bool,
    /// Maximum bus current draw in milliamps.
    pub max_power_ma: u16,
    /// First string index assigned to class drivers.
    pub string_index_base: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            vendor_id: 0x0483,
            product_id: 0x0000,
            device_version: BCDVersion { major: 0x02, minor: 0x00 },
            manufacturer: String::from("Great Scott Gadgets"),
            product: String::from("Composite Device"),
            serial: String::from("000000000000"),
            self_powered: false,
            remote_wakeup: false,
            max_power_ma: 100,
            string_index_base: DEFAULT_STRING_INDEX_BASE,
        }
    }
}

/// A composite device: an ordered set of class drivers plus the
/// assembled descriptors describing them as one configuration.
pub struct Composite {
    config: DeviceConfig,
    classes: Vec<Box<dyn ClassDriver>>,
    identities: Vec<ClassIdentity>,
    strings: VecMap<StringId, String>,
    fs_config: Vec<u8>,
    hs_config: Vec<u8>,
    num_interfaces: u8,
    mounted: bool,
}

impl Composite {
    pub fn new(config: DeviceConfig) -> Self {
        Composite {
            config,
            classes: Vec::new(),
            identities: Vec::new(),
            strings: VecMap::new(),
            fs_config: Vec::new(),
            hs_config: Vec::new(),
            num_interfaces: 0,
            mounted: false,
        }
    }

    /// Add a class driver. Mount order determines interface and
    /// endpoint assignment and the fragment order in the configuration.
    pub fn add_class(&mut self, class: Box<dyn ClassDriver>) {
        assert!(!self.mounted, "classes must be added before mount");
        self.classes.push(class);
    }

    /// Assign identities and assemble the configuration descriptors.
    ///
    /// Must be called exactly once, before the device is started; the
    /// descriptors are read-only afterwards. Any resource exhaustion or
    /// inconsistency between a driver's declared resources and its
    /// emitted fragment aborts the mount.
    pub fn mount(&mut self) -> Result<(), Error> {
        ensure!(!self.mounted, "composite device already mounted");
        ensure!(!self.classes.is_empty(), "no classes to mount");

        let mut next_interface: u8 = 0;
        let mut next_in_ep: u8 = 1;
        let mut next_out_ep: u8 = 1;
        let mut next_string: u8 = self.config.string_index_base;

        for class in &mut self.classes {
            let resources = class.resources();
            let name = class.name();
            if next_in_ep as u16 + resources.in_endpoints as u16 >
                MAX_ENDPOINT_NUM as u16 + 1
            {
                bail!("mounting {name} exceeds the {MAX_ENDPOINT_NUM} \
                       available IN endpoints");
            }
            if next_out_ep as u16 + resources.out_endpoints as u16 >
                MAX_ENDPOINT_NUM as u16 + 1
            {
                bail!("mounting {name} exceeds the {MAX_ENDPOINT_NUM} \
                       available OUT endpoints");
            }
            if next_interface.checked_add(resources.interfaces).is_none() {
                bail!("mounting {name} exceeds the available interfaces");
            }
            let string_count = resources.strings.len() as u8;
            if next_string.checked_add(string_count).is_none() {
                bail!("mounting {name} exceeds the available string indices");
            }

            let identity = ClassIdentity {
                interfaces: (next_interface ..
                             next_interface + resources.interfaces)
                    .map(InterfaceNum)
                    .collect(),
                in_endpoints: (next_in_ep ..
                               next_in_ep + resources.in_endpoints)
                    .map(|num| EndpointAddr::from_parts(
                        EndpointNum(num), Direction::In))
                    .collect(),
                out_endpoints: (next_out_ep ..
                                next_out_ep + resources.out_endpoints)
                    .map(|num| EndpointAddr::from_parts(
                        EndpointNum(num), Direction::Out))
                    .collect(),
                strings: (next_string .. next_string + string_count)
                    .map(StringId)
                    .collect(),
            };

            for (slot, text) in resources.strings.iter().enumerate() {
                self.strings.set(identity.strings[slot], text.clone());
            }

            next_interface += resources.interfaces;
            next_in_ep += resources.in_endpoints;
            next_out_ep += resources.out_endpoints;
            next_string += string_count;

            class.assign(identity.clone());
            self.identities.push(identity);
        }

        self.num_interfaces = next_interface;
        self.fs_config = self.build_config(Speed::Full)?;
        self.hs_config = self.build_config(Speed::High)?;
        self.mounted = true;
        Ok(())
    }

    fn build_config(&self, speed: Speed) -> Result<Vec<u8>, Error> {
        let mut fragments: Vec<u8> = Vec::new();
        for (class, identity) in
            self.classes.iter().zip(self.identities.iter())
        {
            let fragment = class.config_fragment(speed);
            validate_fragment(class.name(), identity, &fragment)
                .with_context(|| format!(
                    "invalid {speed:?} speed fragment from {}",
                    class.name()))?;
            fragments.extend_from_slice(&fragment);
        }

        let total_length = 9 + fragments.len();
        ensure!(total_length <= u16::MAX as usize,
                "configuration descriptor exceeds 65535 bytes");

        let mut attributes = 0x80;
        if self.config.self_powered {
            attributes |= 0x40;
        }
        if self.config.remote_wakeup {
            attributes |= 0x20;
        }

        let mut bytes = Vec::with_capacity(total_length);
        bytes.extend_from_slice(ConfigDescriptor {
            length: 9,
            descriptor_type: DescriptorType::Configuration.into(),
            total_length: total_length as u16,
            num_interfaces: self.num_interfaces,
            config_value: 1,
            config_str_id: StringId(0),
            attributes,
            max_power: (self.config.max_power_ma / 2) as u8,
        }.bytes());
        bytes.extend_from_slice(&fragments);
        Ok(bytes)
    }

    pub fn device_descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            length: 18,
            descriptor_type: DescriptorType::Device.into(),
            usb_version: BCDVersion { major: 0x02, minor: 0x00 },
            // Composite devices with IADs report EF/02/01.
            device_class: 0xEF,
            device_subclass: 0x02,
            device_protocol: 0x01,
            max_packet_size_0: 64,
            vendor_id: self.config.vendor_id,
            product_id: self.config.product_id,
            device_version: self.config.device_version,
            manufacturer_str_id: StringId(1),
            product_str_id: StringId(2),
            serial_str_id: StringId(3),
            num_configurations: 1,
        }
    }

    pub fn device_qualifier_descriptor(&self) -> DeviceQualifierDescriptor {
        DeviceQualifierDescriptor {
            length: 10,
            descriptor_type: DescriptorType::DeviceQualifier.into(),
            usb_version: BCDVersion { major: 0x02, minor: 0x00 },
            device_class: 0xEF,
            device_subclass: 0x02,
            device_protocol: 0x01,
            max_packet_size_0: 64,
            num_configurations: 1,
            reserved: 0,
        }
    }

    /// The assembled configuration descriptor for the given speed.
    pub fn config_descriptor(&self, speed: Speed) -> &[u8] {
        match speed {
            Speed::Full => &self.fs_config,
            Speed::High => &self.hs_config,
        }
    }

    /// The configuration the device would use at the other speed,
    /// retyped as an other-speed-configuration descriptor.
    pub fn other_speed_config_descriptor(&self, speed: Speed) -> Vec<u8> {
        let mut bytes = match speed {
            Speed::Full => self.hs_config.clone(),
            Speed::High => self.fs_config.clone(),
        };
        if bytes.len() > 1 {
            bytes[1] = DescriptorType::OtherSpeedConfiguration.into();
        }
        bytes
    }

    /// UTF-16LE string descriptor for the given index; index zero is
    /// the language id table.
    pub fn string_descriptor(&self, index: StringId) -> Option<Vec<u8>> {
        if index == StringId(0) {
            let langid = LANGID_EN_US.to_le_bytes();
            return Some(vec![4, DescriptorType::String.into(),
                             langid[0], langid[1]]);
        }
        let text = match u8::from(index) {
            1 => &self.config.manufacturer,
            2 => &self.config.product,
            3 => &self.config.serial,
            _ => self.strings.get(index)?,
        };
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut bytes = Vec::with_capacity(2 + units.len() * 2);
        bytes.push((2 + units.len() * 2) as u8);
        bytes.push(DescriptorType::String.into());
        for unit in units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        Some(bytes)
    }

    pub fn num_interfaces(&self) -> u8 {
        self.num_interfaces
    }

    pub fn identities(&self) -> &[ClassIdentity] {
        &self.identities
    }

    /// Initialize every class in mount order. On the first failure,
    /// deinitialize the classes already started, in reverse order, and
    /// report the failure.
    pub fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        for index in 0 .. self.classes.len() {
            if let Err(error) = self.classes[index].init(core) {
                warn!("init of {} failed: {error}; rolling back",
                      self.classes[index].name());
                for prior in (0 .. index).rev() {
                    self.classes[prior].deinit(core);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Deinitialize every class in reverse mount order.
    pub fn deinit(&mut self, core: &mut dyn UsbCore) {
        for class in self.classes.iter_mut().rev() {
            class.deinit(core);
        }
    }

    /// Route a control request to the class owning the addressed
    /// interface or endpoint.
    ///
    /// Only the low byte of wIndex identifies an interface; class
    /// requests carry a unit or terminal id in the high byte.
    pub fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        let class = match fields.type_fields.recipient() {
            Recipient::Endpoint => {
                let addr = fields.endpoint();
                self.class_for_endpoint(addr)
            },
            _ => {
                let interface = fields.interface();
                self.class_for_interface(interface)
            },
        };
        match class {
            Some(index) => self.classes[index].setup(core, fields),
            None => {
                warn!("control request for unassigned wIndex {:#06x}",
                      fields.index);
                Err(ClassError::Stall)
            }
        }
    }

    /// An IN transfer completed on the given endpoint number.
    pub fn data_in(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        let addr = EndpointAddr::from_parts(ep, Direction::In);
        match self.class_for_endpoint(addr) {
            Some(index) => self.classes[index].data_in(core, ep),
            None => {
                warn!("IN completion on unassigned endpoint {ep}");
                Err(ClassError::Stall)
            }
        }
    }

    /// An OUT transfer completed on the given endpoint number.
    pub fn data_out(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        let addr = EndpointAddr::from_parts(ep, Direction::Out);
        match self.class_for_endpoint(addr) {
            Some(index) => self.classes[index].data_out(core, ep),
            None => {
                warn!("OUT completion on unassigned endpoint {ep}");
                Err(ClassError::Stall)
            }
        }
    }

    // EP0 and frame events are not routable by index; every class may
    // hold pending control or isochronous state, so they broadcast.

    pub fn ep0_rx_ready(&mut self, core: &mut dyn UsbCore) {
        for class in &mut self.classes {
            class.ep0_rx_ready(core);
        }
    }

    pub fn ep0_tx_ready(&mut self, core: &mut dyn UsbCore) {
        for class in &mut self.classes {
            class.ep0_tx_ready(core);
        }
    }

    pub fn sof(&mut self, core: &mut dyn UsbCore) {
        for class in &mut self.classes {
            class.sof(core);
        }
    }

    pub fn iso_in_incomplete(&mut self, core: &mut dyn UsbCore,
                             ep: EndpointNum)
    {
        for class in &mut self.classes {
            class.iso_in_incomplete(core, ep);
        }
    }

    pub fn iso_out_incomplete(&mut self, core: &mut dyn UsbCore,
                              ep: EndpointNum)
    {
        for class in &mut self.classes {
            class.iso_out_incomplete(core, ep);
        }
    }

    fn class_for_interface(&self, interface: InterfaceNum) -> Option<usize> {
        self.identities.iter()
            .position(|identity| identity.interfaces.contains(&interface))
    }

    fn class_for_endpoint(&self, addr: EndpointAddr) -> Option<usize> {
        self.identities.iter().position(|identity| {
            match addr.direction() {
                Direction::In => identity.in_endpoints.contains(&addr),
                Direction::Out => identity.out_endpoints.contains(&addr),
            }
        })
    }
}

/// Check that a fragment is well formed and contains exactly the
/// interfaces and endpoints its class was assigned.
fn validate_fragment(name: &str, identity: &ClassIdentity,
                     fragment: &[u8]) -> Result<(), Error>
{
    let mut interfaces: Vec<InterfaceNum> = Vec::new();
    let mut endpoints: Vec<EndpointAddr> = Vec::new();
    let mut iterator = DescriptorIterator::from(fragment);
    for descriptor in iterator.by_ref() {
        match descriptor {
            Descriptor::Configuration(_) =>
                bail!("{name} fragment contains a configuration header"),
            Descriptor::Interface(desc) => {
                if desc.alternate_setting == 0 {
                    interfaces.push(desc.interface_number);
                }
            },
            Descriptor::Endpoint(desc) =>
                endpoints.push(desc.endpoint_address),
            _ => {}
        }
    }
    ensure!(iterator.consumed() == fragment.len(),
            "{name} fragment has {} trailing bytes",
            fragment.len() - iterator.consumed());
    ensure!(interfaces.iter().all_unique(),
            "{name} fragment repeats an interface number");
    ensure!(endpoints.iter().all_unique(),
            "{name} fragment repeats an endpoint address");
    ensure!(interfaces == identity.interfaces,
            "{name} fragment interfaces {interfaces:?} do not match \
             assigned {:?}", identity.interfaces);
    let mut assigned: Vec<EndpointAddr> = identity.in_endpoints.iter()
        .chain(identity.out_endpoints.iter())
        .copied()
        .collect();
    let mut present = endpoints.clone();
    assigned.sort_by_key(|addr| u8::from(*addr));
    present.sort_by_key(|addr| u8::from(*addr));
    ensure!(present == assigned,
            "{name} fragment endpoints {endpoints:?} do not match \
             assigned {assigned:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::class::ClassResources;
    use crate::classes::audio_mic::{AudioMic, AudioMicConfig, AudioMicHandler};
    use crate::classes::cdc_acm::{CdcAcm, CdcAcmHandler, LineCoding};
    use crate::classes::msc::{Msc, MscTransport};
    use crate::descriptors::DescriptorWriter;
    use crate::testing::MockCore;

    #[derive(Default)]
    struct StubLog {
        setups: Vec<&'static str>,
        data_in: Vec<(&'static str, EndpointNum)>,
        inits: Vec<&'static str>,
        deinits: Vec<&'static str>,
    }

    /// Minimal class driver: one interface, one IN and one OUT
    /// endpoint, recording which events reached it.
    struct StubClass {
        name: &'static str,
        fail_init: bool,
        identity: ClassIdentity,
        log: Rc<RefCell<StubLog>>,
    }

    impl StubClass {
        fn new(name: &'static str, log: &Rc<RefCell<StubLog>>) -> Self {
            StubClass {
                name,
                fail_init: false,
                identity: ClassIdentity::default(),
                log: log.clone(),
            }
        }
    }

    impl ClassDriver for StubClass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn resources(&self) -> ClassResources {
            ClassResources {
                interfaces: 1,
                in_endpoints: 1,
                out_endpoints: 1,
                strings: vec![],
            }
        }

        fn assign(&mut self, identity: ClassIdentity) {
            self.identity = identity;
        }

        fn config_fragment(&self, _speed: Speed) -> Vec<u8> {
            let mut writer = DescriptorWriter::new();
            writer.interface(self.identity.interface(0), 0, 2,
                             0xFF, 0x00, 0x00, StringId(0));
            writer.endpoint(self.identity.in_ep(0),
                            EndpointAttr(EndpointType::Bulk as u8), 64, 0);
            writer.endpoint(self.identity.out_ep(0),
                            EndpointAttr(EndpointType::Bulk as u8), 64, 0);
            writer.finish()
        }

        fn init(&mut self, _core: &mut dyn UsbCore) -> ClassResult<()> {
            if self.fail_init {
                return Err(ClassError::Busy);
            }
            self.log.borrow_mut().inits.push(self.name);
            Ok(())
        }

        fn deinit(&mut self, _core: &mut dyn UsbCore) {
            self.log.borrow_mut().deinits.push(self.name);
        }

        fn setup(&mut self, _core: &mut dyn UsbCore, _setup: &SetupFields)
            -> ClassResult<()>
        {
            self.log.borrow_mut().setups.push(self.name);
            Ok(())
        }

        fn data_in(&mut self, _core: &mut dyn UsbCore, ep: EndpointNum)
            -> ClassResult<()>
        {
            self.log.borrow_mut().data_in.push((self.name, ep));
            Ok(())
        }
    }

    fn stub_composite(log: &Rc<RefCell<StubLog>>) -> Composite {
        let mut composite = Composite::new(DeviceConfig::default());
        composite.add_class(Box::new(StubClass::new("alpha", log)));
        composite.add_class(Box::new(StubClass::new("beta", log)));
        composite.mount().unwrap();
        composite
    }

    fn interface_setup(interface: u8) -> SetupFields {
        SetupFields::from_bytes(&[
            0x21, 0x01, 0x00, 0x02, interface, 0x00, 0x02, 0x00])
    }

    struct NullCdcHandler;

    impl CdcAcmHandler for NullCdcHandler {
        fn line_coding_changed(&mut self, _coding: &LineCoding) {}
        fn control_line_state(&mut self, _dtr: bool, _rts: bool) {}
        fn received(&mut self, _data: &[u8]) {}
        fn transmit_complete(&mut self) {}
    }

    struct NullMicHandler;

    impl AudioMicHandler for NullMicHandler {
        fn init(&mut self, _frequency: u32, _channels: u8) {}
        fn deinit(&mut self) {}
        fn record(&mut self) {}
        fn stop(&mut self) {}
        fn volume_changed(&mut self, _volume: i16) {}
        fn mute_changed(&mut self, _mute: bool) {}
    }

    struct NullTransport;

    impl MscTransport for NullTransport {
        fn max_lun(&self) -> u8 { 0 }
        fn reset(&mut self) {}
        fn received(&mut self, _core: &mut dyn UsbCore, _data: &[u8]) {}
        fn transmit_complete(&mut self, _core: &mut dyn UsbCore) {}
    }

    fn three_class_composite() -> Composite {
        let mut composite = Composite::new(DeviceConfig::default());
        composite.add_class(Box::new(CdcAcm::new(NullCdcHandler)));
        composite.add_class(Box::new(AudioMic::new(
            AudioMicConfig::default(), NullMicHandler)));
        composite.add_class(Box::new(Msc::new(NullTransport)));
        composite.mount().unwrap();
        composite
    }

    #[test]
    fn test_end_to_end_mount() {
        let composite = three_class_composite();

        // CDC-ACM: interfaces 0-1, endpoints 0x81/0x82/0x01.
        // Audio mic: interfaces 2-3, endpoint 0x83.
        // MSC: interface 4, endpoints 0x84/0x02.
        let identities = composite.identities();
        assert_eq!(identities[0].interfaces,
                   vec![InterfaceNum(0), InterfaceNum(1)]);
        assert_eq!(identities[0].in_endpoints,
                   vec![EndpointAddr(0x81), EndpointAddr(0x82)]);
        assert_eq!(identities[0].out_endpoints, vec![EndpointAddr(0x01)]);
        assert_eq!(identities[1].interfaces,
                   vec![InterfaceNum(2), InterfaceNum(3)]);
        assert_eq!(identities[1].in_endpoints, vec![EndpointAddr(0x83)]);
        assert_eq!(identities[2].interfaces, vec![InterfaceNum(4)]);
        assert_eq!(identities[2].in_endpoints, vec![EndpointAddr(0x84)]);
        assert_eq!(identities[2].out_endpoints, vec![EndpointAddr(0x02)]);
        assert_eq!(composite.num_interfaces(), 5);

        for speed in [Speed::Full, Speed::High] {
            let bytes = composite.config_descriptor(speed);
            let config = Configuration::from_bytes(bytes).unwrap();
            let total: u16 = config.descriptor.total_length;
            assert_eq!(total as usize, bytes.len());
            assert_eq!(config.descriptor.num_interfaces, 5);
            assert!(config.endpoint_addresses().iter().all_unique());
        }
    }

    #[test]
    fn test_setup_routed_to_owner_only() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = stub_composite(&log);
        let mut core = MockCore::new();

        composite.setup(&mut core, &interface_setup(0)).unwrap();
        assert_eq!(log.borrow().setups, vec!["alpha"]);

        composite.setup(&mut core, &interface_setup(1)).unwrap();
        assert_eq!(log.borrow().setups, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_setup_ignores_entity_id_in_windex_high_byte() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = stub_composite(&log);
        let mut core = MockCore::new();

        // wIndex = 0x0201: entity 2 on interface 1.
        let fields = SetupFields::from_bytes(&[
            0x21, 0x01, 0x00, 0x02, 0x01, 0x02, 0x02, 0x00]);
        composite.setup(&mut core, &fields).unwrap();
        assert_eq!(log.borrow().setups, vec!["beta"]);
    }

    #[test]
    fn test_setup_unassigned_index_stalls() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = stub_composite(&log);
        let mut core = MockCore::new();

        let result = composite.setup(&mut core, &interface_setup(7));
        assert_eq!(result, Err(ClassError::Stall));
        assert!(log.borrow().setups.is_empty());
    }

    #[test]
    fn test_data_routing_is_direction_qualified() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = stub_composite(&log);
        let mut core = MockCore::new();

        // Both stubs hold endpoint number ranges starting at 1 in each
        // direction: alpha has 0x81/0x01, beta has 0x82/0x02.
        composite.data_in(&mut core, EndpointNum(2)).unwrap();
        assert_eq!(log.borrow().data_in, vec![("beta", EndpointNum(2))]);

        assert_eq!(composite.data_in(&mut core, EndpointNum(3)),
                   Err(ClassError::Stall));
    }

    #[test]
    fn test_init_rollback_on_failure() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = Composite::new(DeviceConfig::default());
        composite.add_class(Box::new(StubClass::new("alpha", &log)));
        let mut failing = StubClass::new("beta", &log);
        failing.fail_init = true;
        composite.add_class(Box::new(failing));
        composite.mount().unwrap();

        let mut core = MockCore::new();
        let result = composite.init(&mut core);
        assert_eq!(result, Err(ClassError::Busy));
        assert_eq!(log.borrow().inits, vec!["alpha"]);
        assert_eq!(log.borrow().deinits, vec!["alpha"]);
    }

    #[test]
    fn test_class_strings_start_at_base() {
        let composite = three_class_composite();
        let identities = composite.identities();
        assert_eq!(identities[0].strings, vec![StringId(6)]);
        assert_eq!(identities[1].strings, vec![StringId(7)]);
        assert_eq!(identities[2].strings, vec![StringId(8)]);

        // Index 0 is the language table; 1..=3 are device strings.
        let langid = composite.string_descriptor(StringId(0)).unwrap();
        assert_eq!(langid, vec![4, 3, 0x09, 0x04]);
        assert!(composite.string_descriptor(StringId(6)).is_some());
        assert!(composite.string_descriptor(StringId(20)).is_none());
    }

    #[test]
    fn test_other_speed_descriptor_retyped() {
        let composite = three_class_composite();
        let other = composite.other_speed_config_descriptor(Speed::Full);
        assert_eq!(other[1],
                   u8::from(DescriptorType::OtherSpeedConfiguration));
        assert_eq!(other.len(),
                   composite.config_descriptor(Speed::High).len());
    }

    #[test]
    fn test_double_mount_rejected() {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let mut composite = stub_composite(&log);
        assert!(composite.mount().is_err());
    }
}
