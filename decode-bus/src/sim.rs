//! In-memory [`MediaPlatform`] for bench runs and tests.
//!
//! Every call is recorded. Failures can be injected per operation name,
//! either once or until cleared.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::geometry::Rect;
use crate::hdmi::{ColorCaps, ColorFormat, DisplayMode};
use crate::hw::{
    AudioOutput, BindSource, DecoderAttr, HotplugCallback, HotplugEvent, HwError, HwResult,
    MediaPlatform,
};
use crate::packet::AudioCodec;

#[derive(Default)]
struct SimState {
    calls: Vec<String>,
    fail_once: HashMap<&'static str, i32>,
    fail_always: HashMap<&'static str, i32>,

    decoders: HashMap<usize, DecoderAttr>,
    receiving: HashSet<usize>,
    sends: HashMap<usize, usize>,

    scalers: HashMap<usize, Option<Rect>>,
    scaler_inputs: HashMap<usize, usize>,

    display: Option<DisplayMode>,
    color: Option<ColorFormat>,
    slots: HashSet<usize>,
    shown: HashSet<usize>,
    rects: HashMap<usize, Rect>,
    bindings: HashMap<usize, BindSource>,

    outputs: HashSet<AudioOutput>,
    audio_decoders: HashMap<usize, AudioCodec>,
    audio_binds: HashSet<(usize, AudioOutput)>,
    audio_sends: HashMap<usize, usize>,
    volume: HashMap<AudioOutput, u8>,
    mute: HashMap<AudioOutput, bool>,

    input_enabled: bool,
    encoder: Option<AudioCodec>,
    input_bound: bool,
    captured: VecDeque<Bytes>,

    connected: bool,
    sink_modes: Vec<DisplayMode>,
    color_caps: ColorCaps,
}

pub struct SimPlatform {
    state: Mutex<SimState>,
    hotplug: Mutex<Option<HotplugCallback>>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    /// A connected sink that takes every 1080p and 720p mode.
    pub fn new() -> Self {
        let sink_modes = crate::hdmi::CANDIDATES
            .iter()
            .filter(|m| m.height <= 1080)
            .copied()
            .collect();
        Self {
            state: Mutex::new(SimState {
                connected: true,
                sink_modes,
                color_caps: ColorCaps::default(),
                ..Default::default()
            }),
            hotplug: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: &'static str, detail: String) -> HwResult<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", op, detail).trim_end().to_string());
        if let Some(code) = state.fail_once.remove(op) {
            return Err(HwError::new(op, code));
        }
        if let Some(code) = state.fail_always.get(op) {
            return Err(HwError::new(op, *code));
        }
        Ok(state)
    }

    pub fn fail_next(&self, op: &'static str, code: i32) {
        self.lock().fail_once.insert(op, code);
    }

    pub fn fail_always(&self, op: &'static str, code: i32) {
        self.lock().fail_always.insert(op, code);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_once.clear();
        state.fail_always.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of recorded calls to `op`.
    pub fn count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Position of the first recorded call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.lock().calls.iter().position(|c| c.starts_with(prefix))
    }

    pub fn send_count(&self, decoder: usize) -> usize {
        self.lock().sends.get(&decoder).copied().unwrap_or(0)
    }

    pub fn audio_send_count(&self, decoder: usize) -> usize {
        self.lock().audio_sends.get(&decoder).copied().unwrap_or(0)
    }

    pub fn decoder(&self, decoder: usize) -> Option<DecoderAttr> {
        self.lock().decoders.get(&decoder).cloned()
    }

    pub fn decoder_count(&self) -> usize {
        self.lock().decoders.len()
    }

    pub fn scaler_crop(&self, group: usize) -> Option<Option<Rect>> {
        self.lock().scalers.get(&group).copied()
    }

    pub fn bound_slots(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn slot_rect(&self, slot: usize) -> Option<Rect> {
        self.lock().rects.get(&slot).copied()
    }

    pub fn slot_shown(&self, slot: usize) -> bool {
        self.lock().shown.contains(&slot)
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.lock().display
    }

    pub fn color_format(&self) -> Option<ColorFormat> {
        self.lock().color
    }

    pub fn audio_output_enabled(&self, output: AudioOutput) -> bool {
        self.lock().outputs.contains(&output)
    }

    pub fn volume(&self, output: AudioOutput) -> Option<u8> {
        self.lock().volume.get(&output).copied()
    }

    pub fn muted(&self, output: AudioOutput) -> Option<bool> {
        self.lock().mute.get(&output).copied()
    }

    pub fn capture_running(&self) -> bool {
        let state = self.lock();
        state.input_enabled && state.encoder.is_some() && state.input_bound
    }

    pub fn push_captured(&self, data: impl Into<Bytes>) {
        self.lock().captured.push_back(data.into());
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn set_sink_modes(&self, modes: Vec<DisplayMode>) {
        self.lock().sink_modes = modes;
    }

    pub fn set_color_caps(&self, caps: ColorCaps) {
        self.lock().color_caps = caps;
    }

    /// Calls the registered hot-plug callback like the driver would.
    pub fn trigger_hotplug(&self, event: HotplugEvent) -> bool {
        let callback = self.hotplug.lock().unwrap_or_else(PoisonError::into_inner);
        match callback.as_ref() {
            Some(cb) => {
                cb(event);
                true
            }
            None => false,
        }
    }
}

impl MediaPlatform for SimPlatform {
    fn create_decoder(&self, decoder: usize, attr: &DecoderAttr) -> HwResult<()> {
        let mut state = self.enter(
            "create_decoder",
            format!("{} {:?} {}x{}", decoder, attr.codec, attr.width, attr.height),
        )?;
        if state.decoders.contains_key(&decoder) {
            return Err(HwError::new("create_decoder", HwError::NOT_READY));
        }
        state.decoders.insert(decoder, attr.clone());
        Ok(())
    }

    fn destroy_decoder(&self, decoder: usize) -> HwResult<()> {
        let mut state = self.enter("destroy_decoder", decoder.to_string())?;
        state.receiving.remove(&decoder);
        state
            .decoders
            .remove(&decoder)
            .map(|_| ())
            .ok_or(HwError::new("destroy_decoder", HwError::UNSUPPORTED))
    }

    fn start_receive(&self, decoder: usize) -> HwResult<()> {
        let mut state = self.enter("start_receive", decoder.to_string())?;
        if !state.decoders.contains_key(&decoder) {
            return Err(HwError::new("start_receive", HwError::UNSUPPORTED));
        }
        state.receiving.insert(decoder);
        Ok(())
    }

    fn stop_receive(&self, decoder: usize) -> HwResult<()> {
        let mut state = self.enter("stop_receive", decoder.to_string())?;
        state.receiving.remove(&decoder);
        Ok(())
    }

    fn send_stream(
        &self,
        decoder: usize,
        data: &[u8],
        _pts: u64,
        _timeout: Duration,
    ) -> HwResult<()> {
        let mut state = self.enter("send_stream", format!("{} {}", decoder, data.len()))?;
        if !state.receiving.contains(&decoder) {
            return Err(HwError::new("send_stream", HwError::NOT_READY));
        }
        *state.sends.entry(decoder).or_default() += 1;
        Ok(())
    }

    fn create_scaler(&self, group: usize, width: u32, height: u32) -> HwResult<()> {
        let mut state = self.enter("create_scaler", format!("{} {}x{}", group, width, height))?;
        state.scalers.insert(group, None);
        Ok(())
    }

    fn destroy_scaler(&self, group: usize) -> HwResult<()> {
        let mut state = self.enter("destroy_scaler", group.to_string())?;
        state.scaler_inputs.remove(&group);
        state
            .scalers
            .remove(&group)
            .map(|_| ())
            .ok_or(HwError::new("destroy_scaler", HwError::UNSUPPORTED))
    }

    fn bind_scaler(&self, decoder: usize, group: usize) -> HwResult<()> {
        let mut state = self.enter("bind_scaler", format!("{} {}", decoder, group))?;
        if !state.scalers.contains_key(&group) {
            return Err(HwError::new("bind_scaler", HwError::UNSUPPORTED));
        }
        state.scaler_inputs.insert(group, decoder);
        Ok(())
    }

    fn unbind_scaler(&self, decoder: usize, group: usize) -> HwResult<()> {
        let mut state = self.enter("unbind_scaler", format!("{} {}", decoder, group))?;
        state.scaler_inputs.remove(&group);
        Ok(())
    }

    fn set_scaler_crop(&self, group: usize, crop: Option<Rect>) -> HwResult<()> {
        let mut state = self.enter("set_scaler_crop", format!("{} {:?}", group, crop))?;
        match state.scalers.get_mut(&group) {
            Some(c) => {
                *c = crop;
                Ok(())
            }
            None => Err(HwError::new("set_scaler_crop", HwError::UNSUPPORTED)),
        }
    }

    fn enable_display(&self, mode: DisplayMode) -> HwResult<()> {
        let mut state = self.enter("enable_display", mode.to_string())?;
        state.display = Some(mode);
        Ok(())
    }

    fn disable_display(&self) -> HwResult<()> {
        let mut state = self.enter("disable_display", String::new())?;
        state.display = None;
        Ok(())
    }

    fn enable_slot(&self, slot: usize) -> HwResult<()> {
        let mut state = self.enter("enable_slot", slot.to_string())?;
        state.slots.insert(slot);
        Ok(())
    }

    fn disable_slot(&self, slot: usize) -> HwResult<()> {
        let mut state = self.enter("disable_slot", slot.to_string())?;
        state.slots.remove(&slot);
        state.shown.remove(&slot);
        Ok(())
    }

    fn set_slot_rect(&self, slot: usize, rect: Rect) -> HwResult<()> {
        let mut state = self.enter("set_slot_rect", format!("{} {:?}", slot, rect))?;
        state.rects.insert(slot, rect);
        Ok(())
    }

    fn show_slot(&self, slot: usize) -> HwResult<()> {
        let mut state = self.enter("show_slot", slot.to_string())?;
        state.shown.insert(slot);
        Ok(())
    }

    fn hide_slot(&self, slot: usize) -> HwResult<()> {
        let mut state = self.enter("hide_slot", slot.to_string())?;
        state.shown.remove(&slot);
        Ok(())
    }

    fn bind_slot(&self, source: BindSource, slot: usize) -> HwResult<()> {
        let mut state = self.enter("bind_slot", format!("{:?} {}", source, slot))?;
        if state.bindings.contains_key(&slot) {
            return Err(HwError::new("bind_slot", HwError::NOT_READY));
        }
        state.bindings.insert(slot, source);
        Ok(())
    }

    fn unbind_slot(&self, source: BindSource, slot: usize) -> HwResult<()> {
        let mut state = self.enter("unbind_slot", format!("{:?} {}", source, slot))?;
        match state.bindings.get(&slot) {
            Some(bound) if *bound == source => {
                state.bindings.remove(&slot);
                Ok(())
            }
            _ => Err(HwError::new("unbind_slot", HwError::UNSUPPORTED)),
        }
    }

    fn slot_binding(&self, slot: usize) -> Option<BindSource> {
        self.lock().bindings.get(&slot).copied()
    }

    fn enable_audio_output(&self, output: AudioOutput, sample_rate: u32) -> HwResult<()> {
        let mut state = self.enter(
            "enable_audio_output",
            format!("{:?} {}", output, sample_rate),
        )?;
        state.outputs.insert(output);
        Ok(())
    }

    fn disable_audio_output(&self, output: AudioOutput) -> HwResult<()> {
        let mut state = self.enter("disable_audio_output", format!("{:?}", output))?;
        state.outputs.remove(&output);
        Ok(())
    }

    fn create_audio_decoder(&self, id: usize, codec: AudioCodec) -> HwResult<()> {
        let mut state = self.enter("create_audio_decoder", format!("{} {:?}", id, codec))?;
        state.audio_decoders.insert(id, codec);
        Ok(())
    }

    fn destroy_audio_decoder(&self, id: usize) -> HwResult<()> {
        let mut state = self.enter("destroy_audio_decoder", id.to_string())?;
        state.audio_decoders.remove(&id);
        Ok(())
    }

    fn bind_audio_output(&self, decoder: usize, output: AudioOutput) -> HwResult<()> {
        let mut state = self.enter("bind_audio_output", format!("{} {:?}", decoder, output))?;
        state.audio_binds.insert((decoder, output));
        Ok(())
    }

    fn unbind_audio_output(&self, decoder: usize, output: AudioOutput) -> HwResult<()> {
        let mut state = self.enter("unbind_audio_output", format!("{} {:?}", decoder, output))?;
        state.audio_binds.remove(&(decoder, output));
        Ok(())
    }

    fn send_audio(&self, decoder: usize, data: &[u8], _timeout: Duration) -> HwResult<()> {
        let mut state = self.enter("send_audio", format!("{} {}", decoder, data.len()))?;
        if !state.audio_decoders.contains_key(&decoder) {
            return Err(HwError::new("send_audio", HwError::NOT_READY));
        }
        *state.audio_sends.entry(decoder).or_default() += 1;
        Ok(())
    }

    fn set_output_volume(&self, output: AudioOutput, volume: u8) -> HwResult<()> {
        let mut state = self.enter("set_output_volume", format!("{:?} {}", output, volume))?;
        state.volume.insert(output, volume);
        Ok(())
    }

    fn set_output_mute(&self, output: AudioOutput, mute: bool) -> HwResult<()> {
        let mut state = self.enter("set_output_mute", format!("{:?} {}", output, mute))?;
        state.mute.insert(output, mute);
        Ok(())
    }

    fn enable_audio_input(&self, sample_rate: u32) -> HwResult<()> {
        let mut state = self.enter("enable_audio_input", sample_rate.to_string())?;
        state.input_enabled = true;
        Ok(())
    }

    fn disable_audio_input(&self) -> HwResult<()> {
        let mut state = self.enter("disable_audio_input", String::new())?;
        state.input_enabled = false;
        Ok(())
    }

    fn create_audio_encoder(&self, codec: AudioCodec) -> HwResult<()> {
        let mut state = self.enter("create_audio_encoder", format!("{:?}", codec))?;
        state.encoder = Some(codec);
        Ok(())
    }

    fn destroy_audio_encoder(&self) -> HwResult<()> {
        let mut state = self.enter("destroy_audio_encoder", String::new())?;
        state.encoder = None;
        Ok(())
    }

    fn bind_audio_input(&self) -> HwResult<()> {
        let mut state = self.enter("bind_audio_input", String::new())?;
        state.input_bound = true;
        Ok(())
    }

    fn unbind_audio_input(&self) -> HwResult<()> {
        let mut state = self.enter("unbind_audio_input", String::new())?;
        state.input_bound = false;
        Ok(())
    }

    fn receive_encoded_audio(&self, _timeout: Duration) -> HwResult<Option<Bytes>> {
        let mut state = self.enter("receive_encoded_audio", String::new())?;
        if state.encoder.is_none() {
            return Err(HwError::new("receive_encoded_audio", HwError::NOT_READY));
        }
        Ok(state.captured.pop_front())
    }

    fn display_connected(&self) -> HwResult<bool> {
        let state = self.enter("display_connected", String::new())?;
        Ok(state.connected)
    }

    fn sink_supports(&self, mode: &DisplayMode) -> HwResult<bool> {
        let state = self.enter("sink_supports", mode.to_string())?;
        Ok(state.connected && state.sink_modes.contains(mode))
    }

    fn sink_color_caps(&self) -> HwResult<ColorCaps> {
        let state = self.enter("sink_color_caps", String::new())?;
        Ok(state.color_caps)
    }

    fn set_color_format(&self, format: ColorFormat) -> HwResult<()> {
        let mut state = self.enter("set_color_format", format!("{:?}", format))?;
        state.color = Some(format);
        Ok(())
    }

    fn register_hotplug(&self, callback: HotplugCallback) -> HwResult<()> {
        drop(self.enter("register_hotplug", String::new())?);
        *self.hotplug.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        Ok(())
    }

    fn unregister_hotplug(&self) -> HwResult<()> {
        drop(self.enter("unregister_hotplug", String::new())?);
        *self.hotplug.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_failure_fires_once() {
        let sim = SimPlatform::new();
        sim.fail_next("enable_slot", HwError::FAILED);
        assert!(sim.enable_slot(0).is_err());
        assert!(sim.enable_slot(0).is_ok());
        assert_eq!(sim.count("enable_slot"), 2);
    }

    #[test]
    fn send_requires_receiving_decoder() {
        let sim = SimPlatform::new();
        assert!(sim.send_stream(0, &[1, 2], 0, Duration::ZERO).is_err());
        assert_eq!(sim.send_count(0), 0);
    }

    #[test]
    fn slot_binding_is_exclusive() {
        let sim = SimPlatform::new();
        sim.bind_slot(BindSource::Decoder(1), 0).unwrap();
        assert!(sim.bind_slot(BindSource::Decoder(2), 0).is_err());
        assert!(sim.unbind_slot(BindSource::Decoder(2), 0).is_err());
        sim.unbind_slot(BindSource::Decoder(1), 0).unwrap();
        assert_eq!(sim.slot_binding(0), None);
    }
}
