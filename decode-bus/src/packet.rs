use std::fmt::{Display, Formatter};

use bytes::Bytes;
use serde::Serialize;

use crate::error::{BusError, BusResult};

/// Largest picture edge the decode engine accepts.
pub const MAX_DIMENSION: u32 = 8192;
pub const MAX_FPS: u32 = 240;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum VideoCodec {
    H264,
    H265,
    /// Still-image codec, decoded picture by picture.
    Mjpeg,
}

impl VideoCodec {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            96 => Some(VideoCodec::H264),
            98 => Some(VideoCodec::H265),
            26 => Some(VideoCodec::Mjpeg),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            VideoCodec::H264 => 96,
            VideoCodec::H265 => 98,
            VideoCodec::Mjpeg => 26,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AudioCodec {
    G711U,
    G711A,
    Aac,
}

impl AudioCodec {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(AudioCodec::G711U),
            8 => Some(AudioCodec::G711A),
            37 => Some(AudioCodec::Aac),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            AudioCodec::G711U => 0,
            AudioCodec::G711A => 8,
            AudioCodec::Aac => 37,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
    Unknown(u32),
}

/// Negotiated decode parameters of a video stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VideoParams {
    pub codec: VideoCodec,
    pub ref_frames: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoParams {
    /// Anything but the frame rate changed: the engine channel has to be rebuilt.
    pub fn needs_rebuild(&self, other: &VideoParams) -> bool {
        self.codec != other.codec
            || self.ref_frames != other.ref_frames
            || self.width != other.width
            || self.height != other.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub codec: AudioCodec,
    pub sample_rate: u32,
}

/// One compressed frame as handed over by the recorder.
///
/// Codec ids arrive as raw numbers and are validated when the frame is fed.
#[derive(Clone, Debug)]
pub struct StreamFrame {
    pub media: MediaType,
    pub codec: u32,
    pub data: Bytes,
    pub pts: u64,
    pub is_key: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub ref_frames: u32,
    pub sample_rate: u32,
}

impl StreamFrame {
    pub fn video(
        codec: VideoCodec,
        width: u32,
        height: u32,
        fps: u32,
        is_key: bool,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            media: MediaType::Video,
            codec: codec.id(),
            data: data.into(),
            pts: 0,
            is_key,
            width,
            height,
            fps,
            ref_frames: 2,
            sample_rate: 0,
        }
    }

    pub fn audio(codec: AudioCodec, sample_rate: u32, data: impl Into<Bytes>) -> Self {
        Self {
            media: MediaType::Audio,
            codec: codec.id(),
            data: data.into(),
            pts: 0,
            is_key: true,
            width: 0,
            height: 0,
            fps: 0,
            ref_frames: 0,
            sample_rate,
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_ref_frames(mut self, ref_frames: u32) -> Self {
        self.ref_frames = ref_frames;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn video_params(&self) -> BusResult<VideoParams> {
        let codec = VideoCodec::from_id(self.codec).ok_or_else(|| {
            BusError::InvalidArgument(format!("unsupported video codec {}", self.codec))
        })?;
        if self.width == 0
            || self.height == 0
            || self.fps == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
            || self.fps > MAX_FPS
        {
            return Err(BusError::InvalidArgument(format!(
                "bad video geometry {}x{}@{}",
                self.width, self.height, self.fps
            )));
        }
        Ok(VideoParams {
            codec,
            ref_frames: self.ref_frames,
            width: self.width,
            height: self.height,
            fps: self.fps,
        })
    }

    pub fn audio_params(&self) -> BusResult<AudioParams> {
        let codec = AudioCodec::from_id(self.codec).ok_or_else(|| {
            BusError::InvalidArgument(format!("unsupported audio codec {}", self.codec))
        })?;
        Ok(AudioParams {
            codec,
            sample_rate: if self.sample_rate == 0 {
                8000
            } else {
                self.sample_rate
            },
        })
    }
}

impl Display for StreamFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "StreamFrame {{ media: {:?}, codec: {}, size: {}, key: {} }}",
            self.media,
            self.codec,
            self.data.len(),
            self.is_key
        )
    }
}
