//! Display link negotiation.
//!
//! The sink is probed against a fixed list of standard modes. Modes are
//! grouped into 720p/1080p/2160p tiers; inside a tier the list is ordered by
//! preference, highest refresh first.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::hw::MediaPlatform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
}

impl DisplayMode {
    pub const fn new(width: u32, height: u32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
        }
    }

    pub fn tier(&self) -> Tier {
        if self.height >= 2160 {
            Tier::Uhd2160
        } else if self.height >= 1080 {
            Tier::Fhd1080
        } else {
            Tier::Hd720
        }
    }
}

impl Display for DisplayMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Fhd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Tier {
    pub fn lower(&self) -> Option<Tier> {
        match self {
            Tier::Uhd2160 => Some(Tier::Fhd1080),
            Tier::Fhd1080 => Some(Tier::Hd720),
            Tier::Hd720 => None,
        }
    }

    /// Mode used when the sink reports nothing usable.
    pub fn default_mode(&self) -> DisplayMode {
        match self {
            Tier::Uhd2160 => DisplayMode::new(3840, 2160, 30),
            Tier::Fhd1080 => DisplayMode::new(1920, 1080, 60),
            Tier::Hd720 => DisplayMode::new(1280, 720, 60),
        }
    }
}

/// Probe order.
pub const CANDIDATES: [DisplayMode; 12] = [
    DisplayMode::new(3840, 2160, 60),
    DisplayMode::new(3840, 2160, 50),
    DisplayMode::new(3840, 2160, 30),
    DisplayMode::new(3840, 2160, 25),
    DisplayMode::new(3840, 2160, 24),
    DisplayMode::new(1920, 1080, 60),
    DisplayMode::new(1920, 1080, 50),
    DisplayMode::new(1920, 1080, 30),
    DisplayMode::new(1920, 1080, 25),
    DisplayMode::new(1920, 1080, 24),
    DisplayMode::new(1280, 720, 60),
    DisplayMode::new(1280, 720, 50),
];

/// Picks the best candidate at or below `preferred`.
pub fn select_mode(preferred: Tier, mut supported: impl FnMut(&DisplayMode) -> bool) -> DisplayMode {
    let mut tier = Some(preferred);
    while let Some(t) = tier {
        if let Some(mode) = CANDIDATES
            .iter()
            .filter(|m| m.tier() == t)
            .find(|m| supported(m))
        {
            return *mode;
        }
        log::debug!("hdmi: sink supports nothing in tier {:?}", t);
        tier = t.lower();
    }
    let fallback = preferred.lower().unwrap_or(preferred).default_mode();
    log::warn!(
        "hdmi: no standard mode supported, falling back to {}",
        fallback
    );
    fallback
}

pub fn negotiate(platform: &dyn MediaPlatform, preferred: Tier) -> DisplayMode {
    let mode = select_mode(preferred, |mode| match platform.sink_supports(mode) {
        Ok(supported) => supported,
        Err(e) => {
            log::warn!("hdmi: probing {}: {}", mode, e);
            false
        }
    });
    log::info!("hdmi: negotiated {} (preferred {:?})", mode, preferred);
    mode
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Rgb,
    YCbCr444,
    YCbCr422,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorCaps {
    pub rgb: bool,
    pub ycbcr444: bool,
    pub ycbcr422: bool,
}

impl Default for ColorCaps {
    fn default() -> Self {
        Self {
            rgb: true,
            ycbcr444: true,
            ycbcr422: true,
        }
    }
}

pub fn select_color(caps: ColorCaps) -> ColorFormat {
    if caps.ycbcr444 {
        ColorFormat::YCbCr444
    } else if caps.rgb {
        ColorFormat::Rgb
    } else if caps.ycbcr422 {
        ColorFormat::YCbCr422
    } else {
        // every sink must take RGB
        ColorFormat::Rgb
    }
}

/// Reads the sink's color capabilities and programs the output format.
pub fn negotiate_color(platform: &dyn MediaPlatform) -> ColorFormat {
    let caps = platform.sink_color_caps().unwrap_or_else(|e| {
        log::warn!("hdmi: {}, assuming RGB only", e);
        ColorCaps {
            rgb: true,
            ycbcr444: false,
            ycbcr422: false,
        }
    });
    let format = select_color(caps);
    if let Err(e) = platform.set_color_format(format) {
        log::error!("hdmi: {}", e);
    }
    format
}

/// Blocks until a display is connected. Returns `false` when cancelled first.
pub fn wait_for_connection(
    platform: &dyn MediaPlatform,
    poll: Duration,
    log_every: u32,
    cancel: &CancellationToken,
) -> bool {
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match platform.display_connected() {
            Ok(true) => {
                if attempts > 0 {
                    log::info!("hdmi: display connected after {} attempts", attempts);
                }
                return true;
            }
            Ok(false) => {}
            Err(e) => log::warn!("hdmi: {}", e),
        }
        attempts += 1;
        if log_every > 0 && attempts % log_every == 0 {
            log::warn!("hdmi: waiting for display, {} attempts so far", attempts);
        }
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hw::HwError;
    use crate::sim::SimPlatform;

    #[test]
    fn uhd_request_falls_back_to_720p60() {
        let sink = [DisplayMode::new(1280, 720, 50), DisplayMode::new(1280, 720, 60)];
        let mode = select_mode(Tier::Uhd2160, |m| sink.contains(m));
        assert_eq!(mode, DisplayMode::new(1280, 720, 60));
    }

    #[test]
    fn highest_refresh_in_requested_tier() {
        let sink = [
            DisplayMode::new(3840, 2160, 30),
            DisplayMode::new(1920, 1080, 50),
            DisplayMode::new(1920, 1080, 30),
        ];
        assert_eq!(
            select_mode(Tier::Fhd1080, |m| sink.contains(m)),
            DisplayMode::new(1920, 1080, 50)
        );
        assert_eq!(
            select_mode(Tier::Uhd2160, |m| sink.contains(m)),
            DisplayMode::new(3840, 2160, 30)
        );
    }

    #[test]
    fn nothing_supported_uses_lower_tier_default() {
        assert_eq!(
            select_mode(Tier::Uhd2160, |_| false),
            DisplayMode::new(1920, 1080, 60)
        );
        assert_eq!(
            select_mode(Tier::Hd720, |_| false),
            DisplayMode::new(1280, 720, 60)
        );
    }

    #[test]
    fn color_preference() {
        assert_eq!(select_color(ColorCaps::default()), ColorFormat::YCbCr444);
        let caps = ColorCaps {
            rgb: true,
            ycbcr444: false,
            ycbcr422: true,
        };
        assert_eq!(select_color(caps), ColorFormat::Rgb);
    }

    const POLL: Duration = Duration::from_millis(1);

    #[test]
    fn wait_returns_once_display_is_plugged() {
        let sim = Arc::new(SimPlatform::new());
        sim.set_connected(false);
        let plug = {
            let sim = sim.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                sim.set_connected(true);
            })
        };
        assert!(wait_for_connection(
            &*sim,
            POLL,
            5,
            &CancellationToken::new()
        ));
        plug.join().unwrap();
        assert!(sim.count("display_connected") >= 2);
    }

    #[test]
    fn wait_gives_up_when_cancelled() {
        let sim = SimPlatform::new();
        sim.set_connected(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!wait_for_connection(&sim, Duration::ZERO, 1, &cancel));
        assert_eq!(sim.count("display_connected"), 0);

        let cancel = CancellationToken::new();
        let stopper = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cancel.cancel();
            })
        };
        assert!(!wait_for_connection(&sim, POLL, 0, &cancel));
        stopper.join().unwrap();
        assert!(sim.count("display_connected") >= 1);
    }

    #[test]
    fn wait_keeps_polling_through_errors() {
        let sim = SimPlatform::new();
        sim.fail_next("display_connected", HwError::FAILED);
        assert!(wait_for_connection(
            &sim,
            Duration::ZERO,
            1,
            &CancellationToken::new()
        ));
        assert_eq!(sim.count("display_connected"), 2);

        let sim = Arc::new(SimPlatform::new());
        sim.fail_always("display_connected", HwError::NOT_READY);
        let recover = {
            let sim = sim.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                sim.clear_failures();
            })
        };
        assert!(wait_for_connection(
            &*sim,
            POLL,
            0,
            &CancellationToken::new()
        ));
        recover.join().unwrap();
        let calls = sim.calls();
        assert!(calls.len() >= 2);
        assert!(calls.iter().all(|c| c == "display_connected"));
    }

    #[test]
    fn tier_parses_from_config_names() {
        let tier: Tier = serde_json::from_str("\"2160p\"").unwrap();
        assert_eq!(tier, Tier::Uhd2160);
    }
}
