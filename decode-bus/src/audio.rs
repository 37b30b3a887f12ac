//! Audio playback and capture paths.
//!
//! Playback is owned by at most one display channel at a time. Each physical
//! output gets its own audio decode channel and every frame is sent to both;
//! one decoder fanned out to two outputs drifts and cuts out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{BusError, BusResult};
use crate::hw::{AudioOutput, HwResult, MediaPlatform};
use crate::packet::{AudioCodec, AudioParams};

pub const MAX_VOLUME: u8 = 100;

#[derive(Debug)]
struct AudioState {
    initialized: bool,
    owner: Option<usize>,
    params: Option<AudioParams>,
    volume: u8,
    muted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AudioStatus {
    pub owner: Option<usize>,
    pub running: bool,
    pub volume: u8,
    pub muted: bool,
}

pub struct AudioManager {
    platform: Arc<dyn MediaPlatform>,
    timeout: Duration,
    state: Mutex<AudioState>,
}

impl AudioManager {
    pub fn new(platform: Arc<dyn MediaPlatform>, timeout: Duration) -> Self {
        Self {
            platform,
            timeout,
            state: Mutex::new(AudioState {
                initialized: false,
                owner: None,
                params: None,
                volume: MAX_VOLUME,
                muted: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gives audio out to `channel`, stopping whoever had it.
    pub fn include(&self, channel: usize) {
        let mut state = self.lock();
        if state.owner == Some(channel) {
            return;
        }
        if let Some(prev) = state.owner {
            log::info!("audio: channel {} takes over from {}", channel, prev);
            self.stop_locked(&mut state);
        }
        state.owner = Some(channel);
    }

    /// Drops ownership if `channel` holds it. Returns whether it did.
    pub fn exclude(&self, channel: usize) -> bool {
        let mut state = self.lock();
        if state.owner != Some(channel) {
            return false;
        }
        self.stop_locked(&mut state);
        state.owner = None;
        log::info!("audio: channel {} excluded", channel);
        true
    }

    pub fn current_channel(&self) -> Option<usize> {
        self.lock().owner
    }

    pub fn status(&self) -> AudioStatus {
        let state = self.lock();
        AudioStatus {
            owner: state.owner,
            running: state.initialized,
            volume: state.volume,
            muted: state.muted,
        }
    }

    /// Plays one frame if `channel` owns audio out; other channels are ignored.
    pub fn play(&self, channel: usize, params: AudioParams, data: &[u8]) -> BusResult<()> {
        let mut state = self.lock();
        if state.owner != Some(channel) {
            return Ok(());
        }
        if state.initialized && state.params != Some(params) {
            log::info!("audio: stream format changed to {:?}, restarting", params);
            self.stop_locked(&mut state);
        }
        if !state.initialized {
            self.start_locked(&mut state, params)
                .map_err(BusError::AudioPipeline)?;
        }

        let mut full = false;
        for output in AudioOutput::ALL {
            match self
                .platform
                .send_audio(output.decoder_id(), data, self.timeout)
            {
                Ok(()) => {}
                Err(e) if e.is_buffer_full() => {
                    log::debug!("audio: {:?} queue full, frame dropped", output);
                    full = true;
                }
                Err(e) => {
                    log::error!("audio: {:?}: {}", output, e);
                    self.stop_locked(&mut state);
                    return Err(BusError::AudioPipeline(e));
                }
            }
        }
        if full {
            Err(BusError::AudioBufferFull)
        } else {
            Ok(())
        }
    }

    pub fn set_mute(&self, muted: bool) -> BusResult<()> {
        let mut state = self.lock();
        state.muted = muted;
        if state.owner.is_none() || !state.initialized {
            return Ok(());
        }
        for output in AudioOutput::ALL {
            self.platform
                .set_output_mute(output, muted)
                .map_err(|e| {
                    log::error!("audio: {}", e);
                    BusError::AudioPipeline(e)
                })?;
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: u8) -> BusResult<()> {
        if volume > MAX_VOLUME {
            return Err(BusError::InvalidArgument(format!(
                "volume {} above {}",
                volume, MAX_VOLUME
            )));
        }
        let mut state = self.lock();
        state.volume = volume;
        if state.owner.is_none() || !state.initialized {
            return Ok(());
        }
        for output in AudioOutput::ALL {
            self.platform
                .set_output_volume(output, volume)
                .map_err(|e| {
                    log::error!("audio: {}", e);
                    BusError::AudioPipeline(e)
                })?;
        }
        Ok(())
    }

    /// Stops playback and forgets the owner.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        self.stop_locked(&mut state);
        state.owner = None;
    }

    fn start_locked(&self, state: &mut AudioState, params: AudioParams) -> HwResult<()> {
        for output in AudioOutput::ALL {
            let id = output.decoder_id();
            let started = self
                .platform
                .enable_audio_output(output, params.sample_rate)
                .and_then(|_| self.platform.create_audio_decoder(id, params.codec))
                .and_then(|_| self.platform.bind_audio_output(id, output))
                .and_then(|_| self.platform.set_output_volume(output, state.volume))
                .and_then(|_| self.platform.set_output_mute(output, state.muted));
            if let Err(e) = started {
                log::error!("audio: starting {:?}: {}", output, e);
                self.teardown();
                return Err(e);
            }
        }
        state.initialized = true;
        state.params = Some(params);
        log::info!(
            "audio: playing channel {:?} as {:?}@{}",
            state.owner,
            params.codec,
            params.sample_rate
        );
        Ok(())
    }

    fn stop_locked(&self, state: &mut AudioState) {
        if !state.initialized {
            return;
        }
        self.teardown();
        state.initialized = false;
        state.params = None;
    }

    fn teardown(&self) {
        for output in AudioOutput::ALL {
            let id = output.decoder_id();
            if let Err(e) = self.platform.unbind_audio_output(id, output) {
                log::warn!("audio: {}", e);
            }
            if let Err(e) = self.platform.destroy_audio_decoder(id) {
                log::warn!("audio: {}", e);
            }
            if let Err(e) = self.platform.disable_audio_output(output) {
                log::warn!("audio: {}", e);
            }
        }
    }
}

/// Microphone → encoder path.
pub struct AudioCapture {
    platform: Arc<dyn MediaPlatform>,
    codec: Mutex<Option<AudioCodec>>,
}

impl AudioCapture {
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            platform,
            codec: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<AudioCodec>> {
        self.codec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    pub fn enable(&self, codec: AudioCodec, sample_rate: u32) -> BusResult<()> {
        let mut current = self.lock();
        if *current == Some(codec) {
            return Ok(());
        }
        if current.is_some() {
            self.teardown();
        }
        let started = self
            .platform
            .enable_audio_input(sample_rate)
            .and_then(|_| self.platform.create_audio_encoder(codec))
            .and_then(|_| self.platform.bind_audio_input());
        if let Err(e) = started {
            log::error!("capture: {}", e);
            self.teardown();
            *current = None;
            return Err(BusError::AudioPipeline(e));
        }
        *current = Some(codec);
        log::info!("capture: encoding {:?}@{}", codec, sample_rate);
        Ok(())
    }

    pub fn disable(&self) {
        let mut current = self.lock();
        if current.take().is_some() {
            self.teardown();
        }
    }

    /// Next encoded frame, `None` if nothing arrived within `timeout`.
    pub fn next_frame(&self, timeout: Duration) -> BusResult<Option<Bytes>> {
        if !self.is_enabled() {
            return Err(BusError::InvalidArgument("capture is not enabled".into()));
        }
        self.platform.receive_encoded_audio(timeout).map_err(|e| {
            log::warn!("capture: {}", e);
            BusError::AudioPipeline(e)
        })
    }

    fn teardown(&self) {
        if let Err(e) = self.platform.unbind_audio_input() {
            log::warn!("capture: {}", e);
        }
        if let Err(e) = self.platform.destroy_audio_encoder() {
            log::warn!("capture: {}", e);
        }
        if let Err(e) = self.platform.disable_audio_input() {
            log::warn!("capture: {}", e);
        }
    }
}
