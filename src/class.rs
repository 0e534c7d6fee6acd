//! Contract between the composite dispatcher and a class driver.

use crate::core::{ClassResult, UsbCore};
use crate::usb::prelude::*;

/// What a class driver asks the mounter for: how many interface
/// numbers, IN endpoints, OUT endpoints and string indices it needs,
/// plus the text behind each requested string slot.
#[derive(Clone, Debug, Default)]
pub struct ClassResources {
    pub interfaces: u8,
    pub in_endpoints: u8,
    pub out_endpoints: u8,
    pub strings: Vec<String>,
}

/// The identity a mounted class was granted: one assigned value per
/// requested slot, in request order.
///
/// Each driver owns its identity outright, so two instances of the same
/// class coexist in one configuration without sharing any state.
#[derive(Clone, Debug, Default)]
pub struct ClassIdentity {
    pub interfaces: Vec<InterfaceNum>,
    pub in_endpoints: Vec<EndpointAddr>,
    pub out_endpoints: Vec<EndpointAddr>,
    pub strings: Vec<StringId>,
}

impl ClassIdentity {
    pub fn interface(&self, slot: usize) -> InterfaceNum {
        self.interfaces[slot]
    }

    pub fn in_ep(&self, slot: usize) -> EndpointAddr {
        self.in_endpoints[slot]
    }

    pub fn out_ep(&self, slot: usize) -> EndpointAddr {
        self.out_endpoints[slot]
    }

    pub fn string(&self, slot: usize) -> StringId {
        self.strings[slot]
    }
}

/// A USB function that can be mounted into a composite configuration.
///
/// The mounter calls `resources`, then `assign`, then `config_fragment`
/// once per speed. After SetConfiguration the dispatcher calls `init`,
/// then routes bus events to the owning driver until `deinit`.
///
/// Event methods a class has no use for keep their no-op defaults, the
/// same way an unused slot stays empty in a device-stack operation
/// table.
pub trait ClassDriver {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    fn resources(&self) -> ClassResources;

    /// Accept the identity the mounter assigned. Called exactly once,
    /// before any descriptor or event method.
    fn assign(&mut self, identity: ClassIdentity);

    /// This function's slice of the configuration descriptor: interface
    /// association (if any), interfaces, class-specific descriptors and
    /// endpoints, carrying the assigned numbers.
    fn config_fragment(&self, speed: Speed) -> Vec<u8>;

    /// Open endpoints and arm initial receives.
    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()>;

    /// Close endpoints and drop any in-flight transfer state.
    fn deinit(&mut self, core: &mut dyn UsbCore);

    /// Handle a control request addressed to one of this class's
    /// interfaces or endpoints.
    fn setup(&mut self, core: &mut dyn UsbCore, setup: &SetupFields)
        -> ClassResult<()>;

    /// An IN transfer on `ep` completed.
    fn data_in(&mut self, _core: &mut dyn UsbCore, _ep: EndpointNum)
        -> ClassResult<()>
    {
        Ok(())
    }

    /// An OUT transfer on `ep` completed.
    fn data_out(&mut self, _core: &mut dyn UsbCore, _ep: EndpointNum)
        -> ClassResult<()>
    {
        Ok(())
    }

    /// The data stage of an OUT control transfer arrived on EP0.
    fn ep0_rx_ready(&mut self, _core: &mut dyn UsbCore) {}

    /// The data stage of an IN control transfer was sent from EP0.
    fn ep0_tx_ready(&mut self, _core: &mut dyn UsbCore) {}

    /// Start of frame.
    fn sof(&mut self, _core: &mut dyn UsbCore) {}

    /// An isochronous IN transfer missed its frame.
    fn iso_in_incomplete(&mut self, _core: &mut dyn UsbCore,
                         _ep: EndpointNum) {}

    /// An isochronous OUT transfer missed its frame.
    fn iso_out_incomplete(&mut self, _core: &mut dyn UsbCore,
                          _ep: EndpointNum) {}
}
