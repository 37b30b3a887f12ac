use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::geometry::Layout;
use crate::hdmi::Tier;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub window_count: usize,
    pub decoder_count: usize,
    /// Sum of `width * height * fps` the decode engines can sustain.
    pub capacity_ceiling: u64,
    pub preferred_tier: Tier,
    pub default_layout: Layout,
    pub send_timeout_ms: u64,
    pub audio_timeout_ms: u64,
    pub frame_buf_count: u32,
    pub stream_buf_size: u32,
    /// Frame compression is enabled from this many pixels up.
    pub compress_min_pixels: u64,
    pub display_poll_ms: u64,
    pub display_log_every: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            window_count: 16,
            decoder_count: 32,
            capacity_ceiling: 4 * 3840 * 2160 * 30,
            preferred_tier: Tier::Fhd1080,
            default_layout: Layout::Four,
            send_timeout_ms: 100,
            audio_timeout_ms: 40,
            frame_buf_count: 6,
            stream_buf_size: 2 * 1024 * 1024,
            compress_min_pixels: 1280 * 720,
            display_poll_ms: 1000,
            display_log_every: 10,
        }
    }
}

impl BusConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: BusConfig = serde_json::from_str(json).context("parse bus config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read bus config {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_count == 0 {
            anyhow::bail!("window_count must be positive");
        }
        if self.decoder_count == 0 {
            anyhow::bail!("decoder_count must be positive");
        }
        if self.default_layout.window_count() > self.window_count {
            anyhow::bail!(
                "default layout {:?} shows more windows than the {} configured",
                self.default_layout,
                self.window_count
            );
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.window_count * 2
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn audio_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_timeout_ms)
    }

    pub fn display_poll(&self) -> Duration {
        Duration::from_millis(self.display_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            BusConfig::from_json(r#"{ "window_count": 4, "default_layout": "One" }"#).unwrap();
        assert_eq!(config.window_count, 4);
        assert_eq!(config.channel_count(), 8);
        assert_eq!(config.decoder_count, 32);
        assert_eq!(config.preferred_tier, Tier::Fhd1080);
    }

    #[test]
    fn layout_larger_than_window_table_is_rejected() {
        let err = BusConfig::from_json(r#"{ "window_count": 4, "default_layout": "Nine" }"#);
        assert!(err.is_err());
    }
}
