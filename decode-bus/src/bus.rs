use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::{
    audio::{AudioCapture, AudioManager, AudioStatus},
    capacity::{CapacityGate, CapacitySnapshot},
    channel::{ChannelStatus, ChannelTable},
    config::BusConfig,
    error::{BusError, BusResult},
    geometry::{self, Layout, Rect},
    hdmi::{self, DisplayMode},
    hw::{BindSource, HwResult, MediaPlatform},
    packet::{AudioCodec, VideoParams},
    watcher::{DisplayEvent, DisplayInfo, HotplugWatcher},
    window::{ShiftDirection, WindowTable},
};

/// Decode/display resource manager.
///
/// Owns the channel table, the window map, the capacity gate and the audio
/// paths for one display output. All calls are blocking.
///
/// Lock order: a channel lock is never held while the window map is taken.
/// The window map may be held while a channel lock is taken briefly.
pub struct DisplayBus {
    pub(crate) platform: Arc<dyn MediaPlatform>,
    pub(crate) config: BusConfig,
    pub(crate) channels: ChannelTable,
    pub(crate) windows: Mutex<WindowTable>,
    pub(crate) capacity: CapacityGate,
    pub(crate) audio: AudioManager,
    pub(crate) capture: AudioCapture,
    pub(crate) display: Arc<Mutex<DisplayInfo>>,
    watcher: Mutex<Option<HotplugWatcher>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WindowStatus {
    pub window: usize,
    pub busy: bool,
    pub channel: Option<usize>,
    pub channel_status: Option<ChannelStatus>,
    pub decoder: Option<usize>,
    pub slot: Option<usize>,
    pub params: Option<VideoParams>,
    pub crop: Option<Rect>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BusStatus {
    pub display: DisplayInfo,
    pub capacity: CapacitySnapshot,
    pub audio: AudioStatus,
    pub capture: bool,
    pub windows: Vec<WindowStatus>,
}

impl DisplayBus {
    /// Negotiates the output mode, brings up the display and every window slot.
    pub fn new(platform: Arc<dyn MediaPlatform>, config: BusConfig) -> BusResult<Self> {
        config
            .validate()
            .map_err(|e| BusError::InvalidArgument(format!("{:#}", e)))?;

        let mode = hdmi::negotiate(platform.as_ref(), config.preferred_tier);
        let color = hdmi::negotiate_color(platform.as_ref());
        platform.enable_display(mode).map_err(BusError::Display)?;
        for slot in 0..config.window_count {
            platform.enable_slot(slot).map_err(BusError::Display)?;
        }

        let display = DisplayInfo {
            preferred: config.preferred_tier,
            mode,
            color,
            layout: config.default_layout,
        };
        let bus = Self {
            channels: ChannelTable::new(config.window_count),
            windows: Mutex::new(WindowTable::new(config.window_count)),
            capacity: CapacityGate::new(config.capacity_ceiling),
            audio: AudioManager::new(platform.clone(), config.audio_timeout()),
            capture: AudioCapture::new(platform.clone()),
            display: Arc::new(Mutex::new(display)),
            watcher: Mutex::new(None),
            platform,
            config,
        };
        {
            let mut windows = bus.lock_windows();
            let count = bus.config.default_layout.window_count();
            bus.show_view(&mut windows, bus.config.default_layout, 0..count);
        }
        log::info!(
            "display bus up: {} windows, {} decoders, mode {}, layout {:?}",
            bus.config.window_count,
            bus.config.decoder_count,
            mode,
            bus.config.default_layout
        );
        Ok(bus)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub(crate) fn lock_windows(&self) -> MutexGuard<'_, WindowTable> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn display_info(&self) -> DisplayInfo {
        *self.display.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_mode(&self) -> DisplayMode {
        self.display_info().mode
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        self.capacity.snapshot()
    }

    pub fn decoder_of(&self, channel: usize) -> usize {
        channel % self.config.decoder_count
    }

    /// Decoder feeding `window`: what the hardware reports for the window's
    /// slot, else the static mapping of its channel.
    pub fn derive_decoder(&self, window: usize) -> BusResult<Option<usize>> {
        self.derive_decoder_locked(&self.lock_windows(), window)
    }

    fn derive_decoder_locked(
        &self,
        windows: &WindowTable,
        window: usize,
    ) -> BusResult<Option<usize>> {
        let Some(channel) = windows.entry(window)?.owned() else {
            return Ok(None);
        };
        let bound = windows
            .slot_of(window)
            .and_then(|slot| self.platform.slot_binding(slot))
            .map(|source| source.decoder());
        Ok(Some(bound.unwrap_or_else(|| self.decoder_of(channel))))
    }

    /// Starts a view on `window` and returns the channel it got.
    pub fn allocate(&self, window: usize) -> BusResult<usize> {
        let previous = self.lock_windows().entry(window)?.channel;

        let candidate = match previous {
            Some(old) => {
                let was_active = {
                    let mut state = self.channels.lock(old)?;
                    if state.status == ChannelStatus::Active {
                        state.status = ChannelStatus::Inactive;
                        true
                    } else {
                        false
                    }
                };
                if was_active {
                    log::info!("window {}: leaving channel {} inactive", window, old);
                    let mut windows = self.lock_windows();
                    self.teardown_pipeline(&mut windows, old);
                }
                self.channels.alternate(old)
            }
            None => self.channels.default_for(window),
        };

        {
            let mut state = self.channels.lock(candidate)?;
            if state.status != ChannelStatus::Ready {
                log::warn!(
                    "window {}: channel {} is {:?} and owned by no window, release it; window stays on channel {:?}",
                    window,
                    candidate,
                    state.status,
                    previous
                );
                return Err(BusError::NoFreeChannel { window });
            }
            state.status = ChannelStatus::Active;
            state.reset_stream();
        }

        let mut windows = self.lock_windows();
        let entry = windows.entry_mut(window)?;
        entry.busy = true;
        entry.channel = Some(candidate);
        entry.crop = None;
        log::info!(
            "window {}: channel {} (decoder {})",
            window,
            candidate,
            self.decoder_of(candidate)
        );
        Ok(candidate)
    }

    /// Stops the view on `channel`. Releasing a released channel is a no-op.
    pub fn release(&self, channel: usize) -> BusResult<()> {
        let usage = {
            let mut state = self.channels.lock(channel)?;
            if state.is_released() {
                return Ok(());
            }
            state.status = ChannelStatus::ReadyWait;
            let usage = state.usage();
            state.reset_stream();
            usage
        };

        {
            let mut windows = self.lock_windows();
            if let Some(window) = windows.owner_of(channel) {
                let entry = windows.entry_mut(window)?;
                entry.busy = false;
                entry.crop = None;
                log::info!("window {}: released channel {}", window, channel);
            }
            self.teardown_pipeline(&mut windows, channel);
        }

        self.capacity.release(usage);
        self.audio.exclude(channel);
        self.channels.lock(channel)?.status = ChannelStatus::Ready;
        Ok(())
    }

    /// Exchanges two windows. Hardware failures while re-binding are logged;
    /// the map is swapped either way.
    pub fn swap(&self, a: usize, b: usize) -> BusResult<()> {
        let mut windows = self.lock_windows();
        windows.check(a)?;
        windows.check(b)?;
        if a == b {
            return Ok(());
        }
        let slot_a = windows.slot_of(a);
        let slot_b = windows.slot_of(b);
        for slot in [slot_a, slot_b].into_iter().flatten() {
            self.unbind_slot(slot);
        }
        windows.swap(a, b)?;
        for (window, slot) in [(a, slot_a), (b, slot_b)] {
            if let Some(slot) = slot {
                if let Err(e) = self.bind_window(&mut windows, window, slot) {
                    log::error!("swap: window {} on slot {}: {}", window, slot, e);
                }
            }
        }
        log::info!("swapped windows {} and {}", a, b);
        Ok(())
    }

    /// Rotates every window by `offset` and redraws the active layout.
    /// Returns for each window the index it was moved from.
    pub fn shift(&self, offset: usize, direction: ShiftDirection) -> Vec<usize> {
        let layout = self.display_info().layout;
        let mut windows = self.lock_windows();
        self.unbind_all(&mut windows);
        let permutation = windows.rotate(offset, direction);
        let count = layout.window_count().min(windows.len());
        self.show_view(&mut windows, layout, 0..count);
        log::info!("shifted windows by {} {:?}", offset, direction);
        permutation
    }

    /// Shows the page of `layout` holding `selected` without touching the
    /// window map. Any later layout change or shift restores the regular view.
    pub fn preview_page(&self, layout: Layout, selected: usize) -> BusResult<Vec<usize>> {
        let mut windows = self.lock_windows();
        windows.check(selected)?;
        let page = geometry::page_range(layout, selected, windows.len());
        self.unbind_all(&mut windows);
        self.show_view(&mut windows, layout, page.clone());
        Ok(page.collect())
    }

    /// Switches the active layout.
    pub fn set_layout(&self, layout: Layout) -> BusResult<()> {
        let mut windows = self.lock_windows();
        if layout.window_count() > windows.len() {
            return Err(BusError::InvalidArgument(format!(
                "layout {:?} needs more than {} windows",
                layout,
                windows.len()
            )));
        }
        self.unbind_all(&mut windows);
        self.display
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .layout = layout;
        self.show_view(&mut windows, layout, 0..layout.window_count());
        log::info!("layout set to {:?}", layout);
        Ok(())
    }

    pub fn include_audio(&self, channel: usize) -> BusResult<()> {
        self.channels.check(channel)?;
        self.audio.include(channel);
        Ok(())
    }

    pub fn exclude_audio(&self, channel: usize) -> BusResult<bool> {
        self.channels.check(channel)?;
        Ok(self.audio.exclude(channel))
    }

    pub fn current_audio_channel(&self) -> Option<usize> {
        self.audio.current_channel()
    }

    pub fn set_mute(&self, muted: bool) -> BusResult<()> {
        self.audio.set_mute(muted)
    }

    pub fn set_volume(&self, volume: u8) -> BusResult<()> {
        self.audio.set_volume(volume)
    }

    pub fn start_capture(&self, codec: AudioCodec, sample_rate: u32) -> BusResult<()> {
        self.capture.enable(codec, sample_rate)
    }

    pub fn stop_capture(&self) {
        self.capture.disable()
    }

    pub fn next_captured_frame(&self) -> BusResult<Option<bytes::Bytes>> {
        self.capture.next_frame(self.config.audio_timeout())
    }

    pub fn status(&self) -> BusStatus {
        let display = self.display_info();
        let windows = self.lock_windows();
        let statuses = windows
            .entries()
            .iter()
            .enumerate()
            .map(|(window, entry)| {
                let state = entry
                    .channel
                    .and_then(|c| self.channels.lock(c).ok().map(|s| (s.status, s.params)));
                WindowStatus {
                    window,
                    busy: entry.busy,
                    channel: entry.channel,
                    channel_status: state.map(|(status, _)| status),
                    decoder: self
                        .derive_decoder_locked(&windows, window)
                        .ok()
                        .flatten(),
                    slot: windows.slot_of(window),
                    params: state.and_then(|(_, params)| params),
                    crop: entry.crop,
                }
            })
            .collect();
        BusStatus {
            display,
            capacity: self.capacity.snapshot(),
            audio: self.audio.status(),
            capture: self.capture.is_enabled(),
            windows: statuses,
        }
    }

    /// Starts the hot-plug watcher. Events, including the fatal mode change,
    /// arrive on the returned receiver.
    pub fn start_watcher(&self) -> BusResult<tokio::sync::mpsc::Receiver<DisplayEvent>> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let watcher = HotplugWatcher::spawn(self.platform.clone(), self.display.clone(), tx)
            .map_err(|e| BusError::InvalidArgument(format!("spawn watcher: {}", e)))?;
        self.platform
            .register_hotplug(watcher.waker())
            .map_err(BusError::Display)?;
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut old) = slot.replace(watcher) {
            old.stop();
        }
        Ok(rx)
    }

    /// Stops the watcher, releases every channel and takes the display and
    /// audio paths down.
    pub fn shutdown(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut watcher) = watcher {
            if let Err(e) = self.platform.unregister_hotplug() {
                log::warn!("shutdown: {}", e);
            }
            watcher.stop();
        }

        for channel in 0..self.channels.len() {
            if let Err(e) = self.release(channel) {
                log::warn!("shutdown: channel {}: {}", channel, e);
            }
        }

        {
            let mut windows = self.lock_windows();
            self.unbind_all(&mut windows);
            windows.clear_slots();
        }
        for slot in 0..self.config.window_count {
            if let Err(e) = self.platform.disable_slot(slot) {
                log::warn!("shutdown: {}", e);
            }
        }
        if let Err(e) = self.platform.disable_display() {
            log::warn!("shutdown: {}", e);
        }
        self.audio.shutdown();
        self.capture.disable();
        log::info!("display bus down");
    }

    /// Points slots `0..` at `windows_shown`, lays them out for `layout` and
    /// binds every busy window among them.
    fn show_view(
        &self,
        windows: &mut WindowTable,
        layout: Layout,
        windows_shown: std::ops::Range<usize>,
    ) {
        let mode = self.display_info().mode;
        let rects = geometry::layout_rects(layout, mode.width, mode.height);
        windows.clear_slots();
        for slot in 0..windows.len() {
            let result = match rects.get(slot) {
                Some(rect) => self
                    .platform
                    .set_slot_rect(slot, *rect)
                    .and_then(|_| self.platform.show_slot(slot)),
                None => self.platform.hide_slot(slot),
            };
            if let Err(e) = result {
                log::warn!("slot {}: {}", slot, e);
            }
        }
        for (slot, window) in windows_shown.enumerate().take(rects.len()) {
            windows.set_slot(slot, Some(window));
            if let Err(e) = self.bind_window(windows, window, slot) {
                log::error!("window {} on slot {}: {}", window, slot, e);
            }
        }
    }

    fn unbind_all(&self, windows: &mut WindowTable) {
        for slot in 0..windows.len() {
            self.unbind_slot(slot);
        }
    }

    pub(crate) fn unbind_slot(&self, slot: usize) {
        if let Some(source) = self.platform.slot_binding(slot) {
            if let Err(e) = self.platform.unbind_slot(source, slot) {
                log::warn!("slot {}: {}", slot, e);
            }
        }
    }

    /// Binds the window's live decoder to `slot`, through its scaling unit
    /// when the window is zoomed. Free windows and windows whose decoder has
    /// not been created yet are skipped.
    pub(crate) fn bind_window(
        &self,
        windows: &mut WindowTable,
        window: usize,
        slot: usize,
    ) -> HwResult<()> {
        let Ok(entry) = windows.entry(window).copied() else {
            return Ok(());
        };
        let Some(channel) = entry.owned() else {
            return Ok(());
        };
        let decoder = self.decoder_of(channel);
        if windows.decoder_owner(decoder) != Some(channel) {
            return Ok(());
        }
        match entry.crop {
            Some(crop) => {
                self.ensure_scaler(windows, decoder)?;
                self.platform.set_scaler_crop(decoder, Some(crop))?;
                self.platform.bind_slot(BindSource::Scaler(decoder), slot)
            }
            None => self.platform.bind_slot(BindSource::Decoder(decoder), slot),
        }
    }
}

impl Drop for DisplayBus {
    fn drop(&mut self) {
        if let Some(mut watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.stop();
        }
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;
