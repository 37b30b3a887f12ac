//! Background display watcher.
//!
//! The driver's hot-plug callback only drops a message into the watcher's
//! mailbox; all re-negotiation happens on the watcher thread.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::hdmi::{self, ColorFormat, DisplayMode, Tier};
use crate::hw::{HotplugCallback, HotplugEvent, MediaPlatform};
use crate::geometry::Layout;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What the display subsystem is currently running with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayInfo {
    pub preferred: Tier,
    pub mode: DisplayMode,
    pub color: ColorFormat,
    pub layout: Layout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    Connected(DisplayMode),
    Disconnected,
    ColorChanged(ColorFormat),
    /// The sink now wants a different mode. The display pipeline cannot be
    /// switched live; the process has to be restarted.
    ModeChanged {
        running: DisplayMode,
        negotiated: DisplayMode,
    },
}

impl DisplayEvent {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DisplayEvent::ModeChanged { .. })
    }
}

enum WatcherMsg {
    Hotplug(HotplugEvent),
    Shutdown,
}

pub struct HotplugWatcher {
    cancel: CancellationToken,
    wake: mpsc::Sender<WatcherMsg>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    pub fn spawn(
        platform: Arc<dyn MediaPlatform>,
        display: Arc<Mutex<DisplayInfo>>,
        events: tokio::sync::mpsc::Sender<DisplayEvent>,
    ) -> std::io::Result<Self> {
        let cancel = CancellationToken::new();
        let (wake, rx) = mpsc::channel();
        let cancel_clone = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("hdmi-watcher".to_string())
            .spawn(move || Self::watch_loop(platform, display, cancel_clone, rx, events))?;
        Ok(Self {
            cancel,
            wake,
            handle: Some(handle),
        })
    }

    /// Callback to hand to the driver.
    pub fn waker(&self) -> HotplugCallback {
        let wake = self.wake.clone();
        Box::new(move |event| {
            let _ = wake.send(WatcherMsg::Hotplug(event));
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        let _ = self.wake.send(WatcherMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("hdmi: watcher thread panicked");
            }
        }
    }

    fn watch_loop(
        platform: Arc<dyn MediaPlatform>,
        display: Arc<Mutex<DisplayInfo>>,
        cancel: CancellationToken,
        rx: mpsc::Receiver<WatcherMsg>,
        events: tokio::sync::mpsc::Sender<DisplayEvent>,
    ) {
        let mut color_dirty = false;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(WatcherMsg::Hotplug(event)) => {
                    log::info!("hdmi: hot-plug event {:?}", event);
                    if matches!(event, HotplugEvent::Plugged | HotplugEvent::CapsChanged) {
                        color_dirty = true;
                    }
                    if !Self::recheck(platform.as_ref(), &display, &mut color_dirty, &events) {
                        break;
                    }
                }
                Ok(WatcherMsg::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("hdmi: watcher exited");
    }

    /// Returns `false` once the running mode is no longer valid.
    fn recheck(
        platform: &dyn MediaPlatform,
        display: &Mutex<DisplayInfo>,
        color_dirty: &mut bool,
        events: &tokio::sync::mpsc::Sender<DisplayEvent>,
    ) -> bool {
        match platform.display_connected() {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("hdmi: display disconnected");
                let _ = events.try_send(DisplayEvent::Disconnected);
                return true;
            }
            Err(e) => {
                log::error!("hdmi: {}", e);
                return true;
            }
        }

        if *color_dirty {
            let color = hdmi::negotiate_color(platform);
            display.lock().unwrap_or_else(PoisonError::into_inner).color = color;
            *color_dirty = false;
            let _ = events.try_send(DisplayEvent::ColorChanged(color));
        }

        let (preferred, running) = {
            let info = display.lock().unwrap_or_else(PoisonError::into_inner);
            (info.preferred, info.mode)
        };
        let negotiated = hdmi::negotiate(platform, preferred);
        if negotiated != running {
            log::error!(
                "hdmi: sink wants {} while running {}, restart required",
                negotiated,
                running
            );
            if events
                .blocking_send(DisplayEvent::ModeChanged {
                    running,
                    negotiated,
                })
                .is_err()
            {
                log::error!("hdmi: nobody is listening for the restart request");
            }
            return false;
        }
        let _ = events.try_send(DisplayEvent::Connected(running));
        true
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdmi::ColorCaps;
    use crate::sim::SimPlatform;

    fn info(mode: DisplayMode) -> Arc<Mutex<DisplayInfo>> {
        Arc::new(Mutex::new(DisplayInfo {
            preferred: Tier::Fhd1080,
            mode,
            color: ColorFormat::Rgb,
            layout: Layout::Four,
        }))
    }

    #[tokio::test]
    async fn mode_change_is_reported_and_stops_the_watcher() {
        let sim = Arc::new(SimPlatform::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut watcher =
            HotplugWatcher::spawn(sim.clone(), info(DisplayMode::new(1920, 1080, 60)), tx)
                .unwrap();
        sim.register_hotplug(watcher.waker()).unwrap();

        sim.set_sink_modes(vec![DisplayMode::new(1280, 720, 60)]);
        assert!(sim.trigger_hotplug(HotplugEvent::Plugged));

        let mut fatal = None;
        while let Some(event) = rx.recv().await {
            if event.is_fatal() {
                fatal = Some(event);
                break;
            }
        }
        assert_eq!(
            fatal,
            Some(DisplayEvent::ModeChanged {
                running: DisplayMode::new(1920, 1080, 60),
                negotiated: DisplayMode::new(1280, 720, 60),
            })
        );
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn same_mode_replug_renegotiates_color_only() {
        let sim = Arc::new(SimPlatform::new());
        let display = info(DisplayMode::new(1920, 1080, 60));
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut watcher = HotplugWatcher::spawn(sim.clone(), display.clone(), tx).unwrap();
        sim.register_hotplug(watcher.waker()).unwrap();

        sim.trigger_hotplug(HotplugEvent::Plugged);
        assert_eq!(
            rx.recv().await,
            Some(DisplayEvent::ColorChanged(ColorFormat::YCbCr444))
        );
        assert_eq!(
            rx.recv().await,
            Some(DisplayEvent::Connected(DisplayMode::new(1920, 1080, 60)))
        );
        assert_eq!(display.lock().unwrap().color, ColorFormat::YCbCr444);
        assert!(watcher.is_running());
        watcher.stop();
    }

    #[tokio::test]
    async fn sink_without_444_falls_back_to_rgb() {
        let sim = Arc::new(SimPlatform::new());
        let display = info(DisplayMode::new(1920, 1080, 60));
        display.lock().unwrap().color = ColorFormat::YCbCr444;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut watcher = HotplugWatcher::spawn(sim.clone(), display.clone(), tx).unwrap();
        sim.register_hotplug(watcher.waker()).unwrap();

        sim.set_color_caps(ColorCaps {
            rgb: true,
            ycbcr444: false,
            ycbcr422: true,
        });
        sim.trigger_hotplug(HotplugEvent::CapsChanged);
        assert_eq!(
            rx.recv().await,
            Some(DisplayEvent::ColorChanged(ColorFormat::Rgb))
        );
        assert_eq!(
            rx.recv().await,
            Some(DisplayEvent::Connected(DisplayMode::new(1920, 1080, 60)))
        );
        assert_eq!(display.lock().unwrap().color, ColorFormat::Rgb);
        assert_eq!(sim.color_format(), Some(ColorFormat::Rgb));
        watcher.stop();
    }

    #[tokio::test]
    async fn unplug_is_not_fatal() {
        let sim = Arc::new(SimPlatform::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut watcher =
            HotplugWatcher::spawn(sim.clone(), info(DisplayMode::new(1920, 1080, 60)), tx)
                .unwrap();
        sim.register_hotplug(watcher.waker()).unwrap();
        sim.set_connected(false);
        sim.trigger_hotplug(HotplugEvent::Unplugged);
        assert_eq!(rx.recv().await, Some(DisplayEvent::Disconnected));
        assert!(watcher.is_running());
        watcher.stop();
    }
}
