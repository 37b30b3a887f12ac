//! Logical display channel records.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::capacity::Usage;
use crate::error::{BusError, BusResult};
use crate::packet::VideoParams;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ChannelStatus {
    #[default]
    Ready,
    Active,
    /// Reassigned away from its window without a release.
    Inactive,
    /// Release in progress.
    ReadyWait,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelState {
    pub status: ChannelStatus,
    pub key_received: bool,
    /// `None` until the first frame configured the engine channel.
    pub params: Option<VideoParams>,
}

impl ChannelState {
    pub fn usage(&self) -> Usage {
        self.params
            .map(|p| Usage::new(p.width, p.height, p.fps))
            .unwrap_or(Usage::EMPTY)
    }

    pub fn reset_stream(&mut self) {
        self.key_received = false;
        self.params = None;
    }

    pub fn is_released(&self) -> bool {
        matches!(
            self.status,
            ChannelStatus::Ready | ChannelStatus::ReadyWait
        )
    }
}

/// Two channels per window so a window can move to a fresh decoder while the
/// one it left is still draining.
pub struct ChannelTable {
    window_count: usize,
    entries: Vec<Mutex<ChannelState>>,
}

impl ChannelTable {
    pub fn new(window_count: usize) -> Self {
        Self {
            window_count,
            entries: (0..window_count * 2)
                .map(|_| Mutex::new(ChannelState::default()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check(&self, channel: usize) -> BusResult<()> {
        if channel < self.entries.len() {
            Ok(())
        } else {
            Err(BusError::InvalidArgument(format!(
                "channel {} out of range",
                channel
            )))
        }
    }

    pub fn lock(&self, channel: usize) -> BusResult<MutexGuard<'_, ChannelState>> {
        self.entries
            .get(channel)
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| BusError::InvalidArgument(format!("channel {} out of range", channel)))
    }

    pub fn status(&self, channel: usize) -> BusResult<ChannelStatus> {
        Ok(self.lock(channel)?.status)
    }

    /// Channel a window gets the first time it is used.
    pub fn default_for(&self, window: usize) -> usize {
        window
    }

    pub fn alternate(&self, channel: usize) -> usize {
        (channel + self.window_count) % (self.window_count * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::VideoCodec;

    #[test]
    fn alternate_is_an_involution() {
        let table = ChannelTable::new(16);
        assert_eq!(table.len(), 32);
        for c in 0..table.len() {
            let alt = table.alternate(c);
            assert_ne!(alt, c);
            assert_eq!(table.alternate(alt), c);
        }
        assert_eq!(table.alternate(3), 19);
    }

    #[test]
    fn all_channels_start_ready() {
        let table = ChannelTable::new(4);
        for c in 0..table.len() {
            assert_eq!(table.status(c).unwrap(), ChannelStatus::Ready);
        }
        assert!(matches!(
            table.status(8),
            Err(BusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn check_accepts_every_channel_and_nothing_past_the_end() {
        let table = ChannelTable::new(2);
        for c in 0..table.len() {
            assert!(table.check(c).is_ok());
        }
        assert!(matches!(table.check(4), Err(BusError::InvalidArgument(_))));
        assert!(matches!(
            table.check(usize::MAX),
            Err(BusError::InvalidArgument(_))
        ));
    }

    #[test]
    fn reset_stream_clears_usage() {
        let mut state = ChannelState {
            status: ChannelStatus::Active,
            key_received: true,
            params: Some(VideoParams {
                codec: VideoCodec::H264,
                ref_frames: 2,
                width: 1280,
                height: 720,
                fps: 25,
            }),
        };
        assert_eq!(state.usage().cost(), 1280 * 720 * 25);
        state.reset_stream();
        assert!(state.usage().is_empty());
        assert!(!state.key_received);
    }
}
