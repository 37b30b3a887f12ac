use axum::{
    Json, Router,
    extract::Path,
    routing::{get, post},
};
use decode_bus::audio::AudioStatus;
use serde::Deserialize;

use crate::{handler::ApiJsonResult, manager::with_bus};

pub fn audio_router() -> Router {
    Router::new()
        .route("/", get(audio_status))
        .route("/include/{channel}", post(include_audio))
        .route("/exclude/{channel}", post(exclude_audio))
        .route("/mute", post(set_mute))
        .route("/volume", post(set_volume))
}

#[derive(Deserialize)]
struct MuteRequest {
    muted: bool,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: u8,
}

async fn audio_status() -> ApiJsonResult<AudioStatus> {
    let status = with_bus(|bus| Ok(bus.status().audio)).await?;
    Ok(Json(status))
}

async fn include_audio(Path(channel): Path<usize>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.include_audio(channel)).await?;
    Ok(Json(true))
}

/// `false` when `channel` did not own audio out.
async fn exclude_audio(Path(channel): Path<usize>) -> ApiJsonResult<bool> {
    let excluded = with_bus(move |bus| bus.exclude_audio(channel)).await?;
    Ok(Json(excluded))
}

async fn set_mute(Json(req): Json<MuteRequest>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.set_mute(req.muted)).await?;
    Ok(Json(true))
}

async fn set_volume(Json(req): Json<VolumeRequest>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.set_volume(req.volume)).await?;
    Ok(Json(true))
}
