//! Test double for a device-mode controller.

use std::collections::VecDeque;

use crate::core::{DeviceState, UsbCore};
use crate::usb::prelude::*;

/// Records every operation the class stack performs and plays back
/// scripted packets for OUT endpoints and the EP0 data stage.
pub struct MockCore {
    pub opened: Vec<(EndpointAddr, EndpointType, u16)>,
    pub closed: Vec<EndpointAddr>,
    pub flushed: Vec<EndpointAddr>,
    pub transmitted: Vec<(EndpointAddr, Vec<u8>)>,
    pub armed: Vec<(EndpointAddr, usize)>,
    pub ep0_sent: Vec<Vec<u8>>,
    pub ep0_armed: Vec<usize>,
    rx_queue: VecDeque<(EndpointAddr, Vec<u8>)>,
    ep0_rx_queue: VecDeque<Vec<u8>>,
    pub state: DeviceState,
    pub bus_speed: Speed,
}

impl Default for MockCore {
    fn default() -> Self {
        MockCore {
            opened: Vec::new(),
            closed: Vec::new(),
            flushed: Vec::new(),
            transmitted: Vec::new(),
            armed: Vec::new(),
            ep0_sent: Vec::new(),
            ep0_armed: Vec::new(),
            rx_queue: VecDeque::new(),
            ep0_rx_queue: VecDeque::new(),
            state: DeviceState::Configured,
            bus_speed: Speed::Full,
        }
    }
}

impl MockCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a packet to be returned by the next `rx_data` call for
    /// the given OUT endpoint.
    pub fn push_rx(&mut self, addr: EndpointAddr, data: &[u8]) {
        self.rx_queue.push_back((addr, data.to_vec()));
    }

    /// Script the next EP0 OUT data stage.
    pub fn push_ep0_rx(&mut self, data: &[u8]) {
        self.ep0_rx_queue.push_back(data.to_vec());
    }

    /// The most recent packet transmitted on `addr`, if any.
    pub fn last_transmitted(&self, addr: EndpointAddr) -> Option<&[u8]> {
        self.transmitted.iter().rev()
            .find(|(a, _)| *a == addr)
            .map(|(_, data)| data.as_slice())
    }

    pub fn is_open(&self, addr: EndpointAddr) -> bool {
        let opens = self.opened.iter()
            .filter(|(a, ..)| *a == addr).count();
        let closes = self.closed.iter()
            .filter(|a| **a == addr).count();
        opens > closes
    }
}

impl UsbCore for MockCore {
    fn open_ep(&mut self, addr: EndpointAddr, ep_type: EndpointType,
               max_packet_size: u16)
    {
        self.opened.push((addr, ep_type, max_packet_size));
    }

    fn close_ep(&mut self, addr: EndpointAddr) {
        self.closed.push(addr);
    }

    fn flush_ep(&mut self, addr: EndpointAddr) {
        self.flushed.push(addr);
    }

    fn transmit(&mut self, addr: EndpointAddr, data: &[u8]) {
        self.transmitted.push((addr, data.to_vec()));
    }

    fn prepare_receive(&mut self, addr: EndpointAddr, len: usize) {
        self.armed.push((addr, len));
    }

    fn rx_data(&mut self, addr: EndpointAddr, buf: &mut [u8]) -> usize {
        let position = self.rx_queue.iter()
            .position(|(a, _)| *a == addr);
        match position {
            Some(index) => {
                let (_, data) = self.rx_queue.remove(index).unwrap();
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                len
            },
            None => 0
        }
    }

    fn ctl_send(&mut self, data: &[u8]) {
        self.ep0_sent.push(data.to_vec());
    }

    fn ctl_receive(&mut self, len: usize) {
        self.ep0_armed.push(len);
    }

    fn ctl_rx_data(&mut self, buf: &mut [u8]) -> usize {
        match self.ep0_rx_queue.pop_front() {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                len
            },
            None => 0
        }
    }

    fn device_state(&self) -> DeviceState {
        self.state
    }

    fn speed(&self) -> Speed {
        self.bus_speed
    }
}
