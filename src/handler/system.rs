use axum::{
    Json, Router,
    routing::{get, post},
};
use decode_bus::{
    BusError, BusStatus,
    capacity::CapacitySnapshot,
    hdmi::DisplayMode,
    packet::{StreamFrame, VideoCodec},
};
use serde::{Deserialize, Serialize};

use crate::{handler::ApiJsonResult, manager::with_bus};

pub fn system_router() -> Router {
    Router::new()
        .route("/", get(status))
        .route("/mode", get(current_mode))
        .route("/capacity", get(capacity))
        .route("/feed", post(feed))
}

async fn status() -> ApiJsonResult<BusStatus> {
    let status = with_bus(|bus| Ok(bus.status())).await?;
    Ok(Json(status))
}

async fn current_mode() -> ApiJsonResult<DisplayMode> {
    let mode = with_bus(|bus| Ok(bus.current_mode())).await?;
    Ok(Json(mode))
}

async fn capacity() -> ApiJsonResult<CapacitySnapshot> {
    let capacity = with_bus(|bus| Ok(bus.capacity())).await?;
    Ok(Json(capacity))
}

/// Synthetic stream for bench runs: one key frame followed by
/// `frames - 1` delta frames.
#[derive(Deserialize)]
struct FeedRequest {
    channel: usize,
    /// RTP payload type: 96 H.264, 98 H.265, 26 MJPEG.
    codec: u32,
    width: u32,
    height: u32,
    fps: u32,
    frames: u32,
    #[serde(default = "default_frame_size")]
    frame_size: usize,
}

fn default_frame_size() -> usize {
    4096
}

#[derive(Default, Serialize)]
struct FeedResponse {
    sent: u32,
    dropped: u32,
}

async fn feed(Json(req): Json<FeedRequest>) -> ApiJsonResult<FeedResponse> {
    let response = with_bus(move |bus| {
        let codec = VideoCodec::from_id(req.codec)
            .ok_or_else(|| BusError::InvalidArgument(format!("unknown codec {}", req.codec)))?;
        let period = 90_000 / req.fps.max(1) as u64;
        let mut response = FeedResponse::default();
        for i in 0..req.frames {
            let frame = StreamFrame::video(
                codec,
                req.width,
                req.height,
                req.fps,
                i == 0,
                vec![0u8; req.frame_size],
            )
            .with_pts(i as u64 * period);
            match bus.send_frame(req.channel, &frame) {
                Ok(()) => response.sent += 1,
                Err(BusError::DecodeEngine(e)) => {
                    log::debug!("feed: frame {} lost: {}", i, e);
                    response.dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(response)
    })
    .await?;
    Ok(Json(response))
}
