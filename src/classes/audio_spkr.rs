//! USB audio speaker with an isochronous OUT stream.
//!
//! Received packets land in a fixed ring sized for a whole number of
//! packets. Playback starts once the ring first fills; the consumer
//! then paces itself with [`AudioSpkr::sync`] from its half and full
//! transfer callbacks, nudging the next requested buffer size by four
//! bytes to track the host's rate.

use crate::class::{ClassDriver, ClassIdentity, ClassResources};
use crate::classes::audio::*;
use crate::core::{ClassError, ClassResult, DeviceState, UsbCore};
use crate::descriptors::DescriptorWriter;
use crate::usb::prelude::*;

/// Ring capacity in packets.
const PACKET_NUM: usize = 80;

const INPUT_TERMINAL_ID: u8 = 1;
const FEATURE_UNIT_ID: u8 = 2;
const OUTPUT_TERMINAL_ID: u8 = 3;

/// Which half of the consumer's double buffer completed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOffset {
    Half,
    Full,
}

/// Application callbacks for the speaker stream.
pub trait AudioSpkrHandler {
    fn init(&mut self, frequency: u32, volume: u8);

    fn deinit(&mut self);

    /// One packet arrived from the host.
    fn out_packet(&mut self, data: &[u8]);

    /// The ring filled for the first time; begin consuming.
    fn start(&mut self, data: &[u8]);

    /// Continue playback with the next rate-adjusted buffer.
    fn play(&mut self, data: &[u8]);

    fn mute_changed(&mut self, mute: bool);
}

#[derive(Copy, Clone, Debug)]
pub struct AudioSpkrConfig {
    pub frequency: u32,
    pub volume: u8,
}

impl Default for AudioSpkrConfig {
    fn default() -> Self {
        AudioSpkrConfig {
            frequency: 16_000,
            volume: 70,
        }
    }
}

pub struct AudioSpkr<H: AudioSpkrHandler> {
    config: AudioSpkrConfig,
    handler: H,
    identity: ClassIdentity,
    alt_setting: u8,
    buffer: Vec<u8>,
    rd_ptr: usize,
    wr_ptr: usize,
    rd_enable: bool,
    /// True until the ring's first complete fill triggers `start`.
    priming: bool,
    pending: Option<PendingSetCur>,
}

impl<H: AudioSpkrHandler> AudioSpkr<H> {
    pub fn new(config: AudioSpkrConfig, handler: H) -> Self {
        AudioSpkr {
            config,
            handler,
            identity: ClassIdentity::default(),
            alt_setting: 0,
            buffer: Vec::new(),
            rd_ptr: 0,
            wr_ptr: 0,
            rd_enable: false,
            priming: true,
            pending: None,
        }
    }

    fn endpoint(&self) -> EndpointAddr {
        self.identity.out_ep(0)
    }

    /// Stereo 16-bit payload per millisecond frame.
    fn packet_size(&self) -> usize {
        self.config.frequency as usize / 1000 * 2 * 2
    }

    fn buffer_size(&self) -> usize {
        self.packet_size() * PACKET_NUM
    }

    /// Consumer-side pacing, called from the playback half and full
    /// transfer callbacks.
    ///
    /// Advances the read pointer by half the ring and sizes the next
    /// playback buffer four bytes up or down when the gap to the write
    /// pointer nears empty or full. `play` fires only on the full
    /// callback.
    pub fn sync(&mut self, offset: SyncOffset) {
        let total = self.buffer_size();
        let packet = self.packet_size();
        let mut next_size = total / 2;

        if self.rd_enable {
            self.rd_ptr += total / 2;
            if self.rd_ptr >= total {
                self.rd_ptr = 0;
            }
        }

        if self.rd_ptr > self.wr_ptr {
            let gap = self.rd_ptr - self.wr_ptr;
            if gap < packet {
                next_size += 4;
            } else if gap > total - packet {
                next_size -= 4;
            }
        } else {
            let gap = self.wr_ptr - self.rd_ptr;
            if gap < packet {
                next_size -= 4;
            } else if gap > total - packet {
                next_size += 4;
            }
        }

        if offset == SyncOffset::Full && !self.priming {
            self.handler.play(&self.buffer[.. next_size]);
        }
    }
}

impl<H: AudioSpkrHandler> ClassDriver for AudioSpkr<H> {
    fn name(&self) -> &'static str {
        "audio-spkr"
    }

    fn resources(&self) -> ClassResources {
        ClassResources {
            interfaces: 2,
            in_endpoints: 0,
            out_endpoints: 1,
            strings: vec![String::from("Speaker")],
        }
    }

    fn assign(&mut self, identity: ClassIdentity) {
        self.identity = identity;
    }

    fn config_fragment(&self, _speed: Speed) -> Vec<u8> {
        let control_itf = self.identity.interface(0);
        let streaming_itf = self.identity.interface(1);
        let endpoint = self.endpoint();
        let string = self.identity.string(0);

        let controls = [CONTROL_MUTE, 0x00];
        // Header + input terminal + feature unit + output terminal.
        let ac_total = (9 + 12 + 7 + controls.len() + 9) as u16;

        let mut writer = DescriptorWriter::new();
        writer.interface_association(
            control_itf, 2, AUDIO_CLASS, SUBCLASS_AUDIOCONTROL,
            PROTOCOL_UNDEFINED, StringId(0));
        writer.interface(control_itf, 0, 0, AUDIO_CLASS,
                         SUBCLASS_AUDIOCONTROL, PROTOCOL_UNDEFINED, string);
        writer.ac_header(ac_total, streaming_itf);
        writer.input_terminal(INPUT_TERMINAL_ID, TERMINAL_USB_STREAMING,
                              1, 0x0000);
        writer.feature_unit(FEATURE_UNIT_ID, INPUT_TERMINAL_ID, &controls);
        writer.output_terminal(OUTPUT_TERMINAL_ID, TERMINAL_SPEAKER,
                               FEATURE_UNIT_ID);
        writer.interface(streaming_itf, 0, 0, AUDIO_CLASS,
                         SUBCLASS_AUDIOSTREAMING, PROTOCOL_UNDEFINED,
                         StringId(0));
        writer.interface(streaming_itf, 1, 1, AUDIO_CLASS,
                         SUBCLASS_AUDIOSTREAMING, PROTOCOL_UNDEFINED,
                         StringId(0));
        writer.as_general(INPUT_TERMINAL_ID, 1);
        writer.format_type_i(2, self.config.frequency);
        writer.iso_audio_endpoint(
            endpoint,
            EndpointAttr(EndpointType::Isochronous as u8),
            self.packet_size() as u16,
            1);
        writer.as_endpoint_general();
        writer.finish()
    }

    fn init(&mut self, core: &mut dyn UsbCore) -> ClassResult<()> {
        core.open_ep(self.endpoint(), EndpointType::Isochronous,
                     self.packet_size() as u16);
        self.alt_setting = 0;
        self.buffer = vec![0; self.buffer_size()];
        self.rd_ptr = 0;
        self.wr_ptr = 0;
        self.rd_enable = false;
        self.priming = true;

        self.handler.init(self.config.frequency, self.config.volume);

        core.prepare_receive(self.endpoint(), self.packet_size());
        Ok(())
    }

    fn deinit(&mut self, core: &mut dyn UsbCore) {
        core.close_ep(self.endpoint());
        self.handler.deinit();
        self.buffer.clear();
    }

    fn setup(&mut self, core: &mut dyn UsbCore, fields: &SetupFields)
        -> ClassResult<()>
    {
        match fields.type_fields.request_type() {
            RequestType::Class => match fields.request {
                GET_CUR => {
                    let zeros = [0u8; 2];
                    core.ctl_send(&zeros[.. (fields.length as usize).min(2)]);
                    Ok(())
                },
                SET_CUR => {
                    if fields.length > 0 {
                        core.ctl_receive(fields.length as usize);
                        self.pending = Some(PendingSetCur::from_setup(fields));
                    }
                    Ok(())
                },
                _ => Err(ClassError::Stall),
            },
            RequestType::Standard =>
                match StandardRequest::from(fields.request) {
                    StandardRequest::GetStatus => {
                        if core.device_state() == DeviceState::Configured {
                            core.ctl_send(&[0, 0]);
                            Ok(())
                        } else {
                            Err(ClassError::Stall)
                        }
                    },
                    StandardRequest::GetInterface => {
                        core.ctl_send(&[self.alt_setting]);
                        Ok(())
                    },
                    StandardRequest::SetInterface => {
                        if fields.value <= 1 {
                            self.alt_setting = fields.value as u8;
                            Ok(())
                        } else {
                            Err(ClassError::Stall)
                        }
                    },
                    StandardRequest::ClearFeature => Ok(()),
                    _ => Err(ClassError::Stall),
                },
            _ => Err(ClassError::Stall),
        }
    }

    fn data_out(&mut self, core: &mut dyn UsbCore, ep: EndpointNum)
        -> ClassResult<()>
    {
        if ep != self.endpoint().number() {
            return Ok(());
        }
        let total = self.buffer_size();
        let packet = self.packet_size();
        let end = (self.wr_ptr + packet).min(total);
        let len = core.rx_data(
            self.endpoint(), &mut self.buffer[self.wr_ptr .. end]);

        self.handler.out_packet(
            &self.buffer[self.wr_ptr .. self.wr_ptr + len]);

        self.wr_ptr += len;
        if self.wr_ptr >= total {
            self.wr_ptr = 0;
            if self.priming {
                self.handler.start(&self.buffer[.. total / 2]);
                self.priming = false;
            }
        }
        if !self.rd_enable && self.wr_ptr == total / 2 {
            self.rd_enable = true;
        }

        // Re-arm before returning so no frame is dropped.
        core.prepare_receive(self.endpoint(), packet);
        Ok(())
    }

    fn ep0_rx_ready(&mut self, core: &mut dyn UsbCore) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.unit != FEATURE_UNIT_ID {
            self.pending = Some(pending);
            return;
        }
        let mut data = [0u8; 2];
        let len = core.ctl_rx_data(&mut data);
        if pending.selector == CONTROL_MUTE && len >= 1 {
            self.handler.mute_changed(data[0] != 0);
        }
    }
}
