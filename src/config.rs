use std::sync::LazyLock;

use anyhow::Context;
use decode_bus::BusConfig;
use serde::Deserialize;

const CONFIG_ENV: &str = "NVR_DISPLAY_CONFIG";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NvrConfig {
    api_addr: String,
    bus: BusConfig,
}

impl Default for NvrConfig {
    fn default() -> Self {
        Self {
            api_addr: "0.0.0.0:8080".to_string(),
            bus: BusConfig::default(),
        }
    }
}

impl NvrConfig {
    /// Reads the file named by `NVR_DISPLAY_CONFIG`, defaults when unset.
    fn load() -> anyhow::Result<Self> {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("read {}", path))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("parse {}", path))?;
        config.bus.validate().with_context(|| format!("validate {}", path))?;
        Ok(config)
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    pub fn bus(&self) -> &BusConfig {
        &self.bus
    }
}

pub fn config() -> &'static NvrConfig {
    static CONFIG: LazyLock<NvrConfig> = LazyLock::new(|| {
        NvrConfig::load().unwrap_or_else(|e| {
            eprintln!("Error loading config: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
