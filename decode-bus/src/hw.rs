//! Boundary with the board's media framework.
//!
//! Everything the core asks of the hardware goes through [`MediaPlatform`]:
//! decode engines, scaling units, display slots, the audio paths and the
//! display link. Board support crates implement it on top of the vendor SDK;
//! [`crate::sim::SimPlatform`] implements it in software.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::Bytes;

use crate::geometry::Rect;
use crate::hdmi::{ColorCaps, ColorFormat, DisplayMode};
use crate::packet::{AudioCodec, VideoCodec};

/// A failed hardware call: the operation name and the framework's code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HwError {
    pub op: &'static str,
    pub code: i32,
}

impl HwError {
    pub const FAILED: i32 = 0xA000_8001_u32 as i32;
    pub const UNSUPPORTED: i32 = 0xA000_8008_u32 as i32;
    pub const NOT_READY: i32 = 0xA000_8010_u32 as i32;
    pub const BUF_FULL: i32 = 0xA000_8013_u32 as i32;
    pub const TIMEOUT: i32 = 0xA000_8014_u32 as i32;

    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }

    pub fn is_buffer_full(&self) -> bool {
        self.code == Self::BUF_FULL
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

impl Display for HwError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed with {:#010x}", self.op, self.code as u32)
    }
}

impl std::error::Error for HwError {}

pub type HwResult<T> = Result<T, HwError>;

/// Picture buffer sizing handed to the engine when a channel is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PictureBuffer {
    /// Lossless frame buffer compression.
    pub compress: bool,
    pub frame_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderAttr {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub ref_frames: u32,
    pub frame_buf_count: u32,
    pub stream_buf_size: u32,
    pub picture: PictureBuffer,
}

/// What feeds a display slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindSource {
    Decoder(usize),
    Scaler(usize),
}

impl BindSource {
    /// Scaling-unit groups share their id with the decoder they sit behind.
    pub fn decoder(&self) -> usize {
        match *self {
            BindSource::Decoder(id) | BindSource::Scaler(id) => id,
        }
    }
}

/// The two physical audio outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioOutput {
    /// Audio embedded in the display connector.
    Hdmi,
    /// Local line-out jack.
    Local,
}

impl AudioOutput {
    pub const ALL: [AudioOutput; 2] = [AudioOutput::Hdmi, AudioOutput::Local];

    /// Each output is fed by its own audio decode channel.
    pub fn decoder_id(&self) -> usize {
        match self {
            AudioOutput::Hdmi => 0,
            AudioOutput::Local => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotplugEvent {
    Plugged,
    Unplugged,
    /// Sink capabilities changed without a replug.
    CapsChanged,
}

pub type HotplugCallback = Box<dyn Fn(HotplugEvent) + Send + Sync>;

pub trait MediaPlatform: Send + Sync {
    // decode engine
    fn create_decoder(&self, decoder: usize, attr: &DecoderAttr) -> HwResult<()>;
    fn destroy_decoder(&self, decoder: usize) -> HwResult<()>;
    fn start_receive(&self, decoder: usize) -> HwResult<()>;
    fn stop_receive(&self, decoder: usize) -> HwResult<()>;
    fn send_stream(&self, decoder: usize, data: &[u8], pts: u64, timeout: Duration)
    -> HwResult<()>;

    // scaling unit
    fn create_scaler(&self, group: usize, width: u32, height: u32) -> HwResult<()>;
    fn destroy_scaler(&self, group: usize) -> HwResult<()>;
    fn bind_scaler(&self, decoder: usize, group: usize) -> HwResult<()>;
    fn unbind_scaler(&self, decoder: usize, group: usize) -> HwResult<()>;
    fn set_scaler_crop(&self, group: usize, crop: Option<Rect>) -> HwResult<()>;

    // display
    fn enable_display(&self, mode: DisplayMode) -> HwResult<()>;
    fn disable_display(&self) -> HwResult<()>;
    fn enable_slot(&self, slot: usize) -> HwResult<()>;
    fn disable_slot(&self, slot: usize) -> HwResult<()>;
    fn set_slot_rect(&self, slot: usize, rect: Rect) -> HwResult<()>;
    fn show_slot(&self, slot: usize) -> HwResult<()>;
    fn hide_slot(&self, slot: usize) -> HwResult<()>;
    fn bind_slot(&self, source: BindSource, slot: usize) -> HwResult<()>;
    fn unbind_slot(&self, source: BindSource, slot: usize) -> HwResult<()>;
    /// Current binding of a display slot, as reported by the hardware.
    fn slot_binding(&self, slot: usize) -> Option<BindSource>;

    // audio playback
    fn enable_audio_output(&self, output: AudioOutput, sample_rate: u32) -> HwResult<()>;
    fn disable_audio_output(&self, output: AudioOutput) -> HwResult<()>;
    fn create_audio_decoder(&self, id: usize, codec: AudioCodec) -> HwResult<()>;
    fn destroy_audio_decoder(&self, id: usize) -> HwResult<()>;
    fn bind_audio_output(&self, decoder: usize, output: AudioOutput) -> HwResult<()>;
    fn unbind_audio_output(&self, decoder: usize, output: AudioOutput) -> HwResult<()>;
    fn send_audio(&self, decoder: usize, data: &[u8], timeout: Duration) -> HwResult<()>;
    fn set_output_volume(&self, output: AudioOutput, volume: u8) -> HwResult<()>;
    fn set_output_mute(&self, output: AudioOutput, mute: bool) -> HwResult<()>;

    // audio capture
    fn enable_audio_input(&self, sample_rate: u32) -> HwResult<()>;
    fn disable_audio_input(&self) -> HwResult<()>;
    fn create_audio_encoder(&self, codec: AudioCodec) -> HwResult<()>;
    fn destroy_audio_encoder(&self) -> HwResult<()>;
    fn bind_audio_input(&self) -> HwResult<()>;
    fn unbind_audio_input(&self) -> HwResult<()>;
    /// `Ok(None)` when nothing was encoded within `timeout`.
    fn receive_encoded_audio(&self, timeout: Duration) -> HwResult<Option<Bytes>>;

    // display link
    fn display_connected(&self) -> HwResult<bool>;
    fn sink_supports(&self, mode: &DisplayMode) -> HwResult<bool>;
    fn sink_color_caps(&self) -> HwResult<ColorCaps>;
    fn set_color_format(&self, format: ColorFormat) -> HwResult<()>;
    fn register_hotplug(&self, callback: HotplugCallback) -> HwResult<()>;
    fn unregister_hotplug(&self) -> HwResult<()>;
}
