//! Abstraction over a device-mode USB controller.
//!
//! Class drivers and the composite dispatcher never touch hardware
//! directly; they drive a [`UsbCore`], so the whole stack runs against
//! a scripted double in tests and against a real peripheral port in a
//! firmware build.

use crate::usb::prelude::*;

/// Outcome a class driver reports back to the dispatcher.
///
/// `Stall` asks the core to stall the control pipe (or the data
/// endpoint the event arrived on); `Busy` reports a transient refusal,
/// such as a transmit while a previous one is still in flight.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassError {
    Stall,
    Busy,
}

impl std::fmt::Display for ClassError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ClassError::Stall => write!(f, "request stalled"),
            ClassError::Busy => write!(f, "endpoint busy"),
        }
    }
}

impl std::error::Error for ClassError {}

pub type ClassResult<T> = Result<T, ClassError>;

/// Enumeration state of the device port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Default,
    Addressed,
    Configured,
    Suspended,
}

/// Operations a device-mode controller provides to the class stack.
///
/// Data endpoints are identified by direction-qualified address
/// throughout; the IN and OUT halves of one endpoint number are
/// distinct pipes.
pub trait UsbCore {
    /// Open a data endpoint with the given transfer type and maximum
    /// packet size.
    fn open_ep(&mut self, addr: EndpointAddr, ep_type: EndpointType,
               max_packet_size: u16);

    fn close_ep(&mut self, addr: EndpointAddr);

    /// Discard any packet pending on the endpoint.
    fn flush_ep(&mut self, addr: EndpointAddr);

    /// Queue a packet for transmission on an IN endpoint.
    fn transmit(&mut self, addr: EndpointAddr, data: &[u8]);

    /// Arm an OUT endpoint to accept up to `len` bytes from the host.
    fn prepare_receive(&mut self, addr: EndpointAddr, len: usize);

    /// Copy out the packet most recently received on an OUT endpoint,
    /// returning its length.
    fn rx_data(&mut self, addr: EndpointAddr, buf: &mut [u8]) -> usize;

    /// Send the data stage of an IN control transfer.
    fn ctl_send(&mut self, data: &[u8]);

    /// Arm EP0 for the data stage of an OUT control transfer. The data
    /// arrives later via the EP0 RxReady event.
    fn ctl_receive(&mut self, len: usize);

    /// Copy out the EP0 OUT data stage, returning its length.
    fn ctl_rx_data(&mut self, buf: &mut [u8]) -> usize;

    fn device_state(&self) -> DeviceState;

    /// The speed the bus enumerated at.
    fn speed(&self) -> Speed;
}
