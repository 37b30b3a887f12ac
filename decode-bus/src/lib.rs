//! Decode/display resource manager for a multi-channel recorder.
//!
//! [`DisplayBus`] binds compressed streams to hardware decode pipelines,
//! enforces the aggregate decode budget and keeps viewer windows mapped to
//! the right decoder across layout changes, swaps and display reconnects.
//! Hardware is reached through the [`MediaPlatform`] trait.

pub mod audio;
pub mod bus;
pub mod capacity;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod error;
pub mod geometry;
pub mod hdmi;
pub mod hw;
pub mod packet;
pub mod scaler;
pub mod sim;
pub mod watcher;
pub mod window;

pub use bus::{BusStatus, DisplayBus, WindowStatus};
pub use config::BusConfig;
pub use error::{BusError, BusResult};
pub use hw::MediaPlatform;
pub use watcher::DisplayEvent;
