//! Error types returned by the decode/display core.

use thiserror::Error;

use crate::hw::HwError;

/// Errors surfaced to callers of the display bus.
///
/// Cleanup failures that do not change what the caller observes are logged
/// and never show up here.
#[derive(Error, Debug)]
pub enum BusError {
    /// Malformed frame, codec, window or channel index.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The channel picked for a window was not in `Ready` state.
    #[error("no free channel for window {window}")]
    NoFreeChannel { window: usize },

    /// A frame arrived for a channel that was never allocated or was released.
    #[error("channel {0} is not active")]
    ChannelNotActive(usize),

    /// Admission denied by the capacity gate.
    #[error("no decode capacity: requested {requested}, in use {in_use}, ceiling {ceiling}")]
    NoCapacity {
        requested: u64,
        in_use: u64,
        ceiling: u64,
    },

    /// The engine refused to create or bind a decode pipeline.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(#[source] HwError),

    /// Sending a stream buffer to the engine failed; the frame is lost.
    #[error("decode engine error: {0}")]
    DecodeEngine(#[source] HwError),

    /// Audio decoder queue is full, frame dropped.
    #[error("audio buffer full")]
    AudioBufferFull,

    /// Audio path failed and was torn down.
    #[error("audio pipeline error: {0}")]
    AudioPipeline(#[source] HwError),

    /// Display link could not be brought up.
    #[error("display error: {0}")]
    Display(#[source] HwError),
}

impl BusError {
    /// Stable numeric code handed to the configuration layer.
    pub fn code(&self) -> i32 {
        match self {
            BusError::InvalidArgument(_) => -1,
            BusError::NoFreeChannel { .. } => -2,
            BusError::ChannelNotActive(_) => -3,
            BusError::NoCapacity { .. } => -4,
            BusError::PipelineCreationFailed(_) => -5,
            BusError::DecodeEngine(_) => -6,
            BusError::AudioBufferFull => -7,
            BusError::AudioPipeline(_) => -8,
            BusError::Display(_) => -9,
        }
    }

    /// Soft errors leave the pipeline running.
    pub fn is_soft(&self) -> bool {
        matches!(self, BusError::AudioBufferFull)
    }
}

pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct() {
        let hw = || HwError::new("send_stream", -1);
        let errors = [
            BusError::InvalidArgument("x".into()),
            BusError::NoFreeChannel { window: 0 },
            BusError::ChannelNotActive(0),
            BusError::NoCapacity {
                requested: 1,
                in_use: 1,
                ceiling: 1,
            },
            BusError::PipelineCreationFailed(hw()),
            BusError::DecodeEngine(hw()),
            BusError::AudioBufferFull,
            BusError::AudioPipeline(hw()),
            BusError::Display(hw()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn display_includes_hardware_operation() {
        let err = BusError::DecodeEngine(HwError::new("send_stream", HwError::TIMEOUT));
        let msg = err.to_string();
        assert!(msg.contains("send_stream"));
        assert!(!err.is_soft());
        assert!(BusError::AudioBufferFull.is_soft());
    }
}
