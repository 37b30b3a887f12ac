use std::sync::Arc;

use decode_bus::{DisplayBus, hdmi, sim::SimPlatform};
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;
mod manager;

/// Asks the supervisor to restart the process with the new display mode.
const EXIT_RESTART: i32 = 75;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("decode_bus", log::LevelFilter::Debug)
        .filter_module("nvr_display", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    let cancel = CancellationToken::new();
    let platform = Arc::new(SimPlatform::new());

    let waiter = {
        let platform = platform.clone();
        let cancel = cancel.clone();
        let poll = config.bus().display_poll();
        let log_every = config.bus().display_log_every;
        tokio::task::spawn_blocking(move || {
            hdmi::wait_for_connection(platform.as_ref(), poll, log_every, &cancel)
        })
    };
    tokio::select! {
        connected = waiter => {
            if !matches!(connected, Ok(true)) {
                log::error!("No display connected, giving up");
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            std::process::exit(0);
        },
    }

    let bus_config = config.bus().clone();
    let bus = match tokio::task::spawn_blocking(move || DisplayBus::new(platform, bus_config)).await
    {
        Ok(Ok(bus)) => Arc::new(bus),
        Ok(Err(e)) => {
            log::error!("Error starting display bus: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            log::error!("Error starting display bus: {}", e);
            std::process::exit(1);
        }
    };
    let mut events = bus.start_watcher().unwrap_or_else(|e| {
        log::error!("Error starting display watcher: {}", e);
        std::process::exit(1);
    });
    manager::install(bus.clone()).unwrap_or_else(|e| {
        log::error!("{}", e);
        std::process::exit(1);
    });

    api::start_api_server(config.api_addr(), cancel.clone());

    let mut exit_code = 0;
    let mut watching = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
            event = events.recv(), if watching => match event {
                Some(event) if event.is_fatal() => {
                    log::error!("Display reconfigured ({:?}), restarting", event);
                    exit_code = EXIT_RESTART;
                    cancel.cancel();
                }
                Some(event) => log::info!("Display event: {:?}", event),
                None => {
                    log::warn!("Display watcher stopped");
                    watching = false;
                }
            },
        }
    }

    if let Err(e) = tokio::task::spawn_blocking(move || bus.shutdown()).await {
        log::error!("Error shutting down display bus: {}", e);
    }
    std::process::exit(exit_code);
}
