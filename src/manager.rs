use std::sync::{Arc, OnceLock};

use decode_bus::DisplayBus;

static DISPLAY_BUS: OnceLock<Arc<DisplayBus>> = OnceLock::new();

pub(crate) fn install(bus: Arc<DisplayBus>) -> anyhow::Result<()> {
    DISPLAY_BUS
        .set(bus)
        .map_err(|_| anyhow::anyhow!("Display bus already installed"))
}

pub(crate) fn get_bus() -> anyhow::Result<Arc<DisplayBus>> {
    DISPLAY_BUS
        .get()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Display bus is not running"))
}

/// Runs a blocking bus call off the async workers.
pub(crate) async fn with_bus<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce(&DisplayBus) -> decode_bus::BusResult<T> + Send + 'static,
    T: Send + 'static,
{
    let bus = get_bus()?;
    let result = tokio::task::spawn_blocking(move || f(&bus)).await?;
    Ok(result?)
}
