use axum::{
    Json, Router,
    extract::Path,
    routing::{get, post},
};
use decode_bus::{
    BusError,
    geometry::{Layout, Rect},
    window::ShiftDirection,
};
use serde::{Deserialize, Serialize};

use crate::{handler::ApiJsonResult, manager::with_bus};

pub fn window_router() -> Router {
    Router::new()
        .route("/{window}/start", post(start_view))
        .route("/{window}/decoder", get(window_decoder))
        .route("/{window}/crop", post(set_crop))
        .route("/channel/{channel}/stop", post(stop_view))
        .route("/layout", post(set_layout))
        .route("/swap", post(swap_windows))
        .route("/shift", post(shift_windows))
        .route("/preview", post(preview_page))
}

#[derive(Serialize)]
struct StartResponse {
    window: usize,
    channel: usize,
    decoder: usize,
}

#[derive(Deserialize)]
struct LayoutRequest {
    /// Number of visible windows: 1, 4, 6, 8, 9 or 16.
    layout: u32,
}

#[derive(Deserialize)]
struct SwapRequest {
    a: usize,
    b: usize,
}

#[derive(Deserialize)]
struct ShiftRequest {
    offset: usize,
    direction: ShiftDirection,
}

#[derive(Deserialize)]
struct PreviewRequest {
    layout: u32,
    window: usize,
}

#[derive(Deserialize)]
struct CropRequest {
    /// Screen rectangle in the single-window layout; absent to zoom out.
    rect: Option<Rect>,
}

fn parse_layout(id: u32) -> Result<Layout, BusError> {
    Layout::from_id(id).ok_or_else(|| BusError::InvalidArgument(format!("unknown layout {}", id)))
}

async fn start_view(Path(window): Path<usize>) -> ApiJsonResult<StartResponse> {
    let response = with_bus(move |bus| {
        let channel = bus.allocate(window)?;
        Ok(StartResponse {
            window,
            channel,
            decoder: bus.decoder_of(channel),
        })
    })
    .await?;
    Ok(Json(response))
}

async fn stop_view(Path(channel): Path<usize>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.release(channel)).await?;
    Ok(Json(true))
}

async fn window_decoder(Path(window): Path<usize>) -> ApiJsonResult<Option<usize>> {
    let decoder = with_bus(move |bus| bus.derive_decoder(window)).await?;
    Ok(Json(decoder))
}

async fn set_crop(
    Path(window): Path<usize>,
    Json(req): Json<CropRequest>,
) -> ApiJsonResult<Option<Rect>> {
    let crop = with_bus(move |bus| bus.set_crop(window, req.rect)).await?;
    Ok(Json(crop))
}

async fn set_layout(Json(req): Json<LayoutRequest>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.set_layout(parse_layout(req.layout)?)).await?;
    Ok(Json(true))
}

async fn swap_windows(Json(req): Json<SwapRequest>) -> ApiJsonResult<bool> {
    with_bus(move |bus| bus.swap(req.a, req.b)).await?;
    Ok(Json(true))
}

async fn shift_windows(Json(req): Json<ShiftRequest>) -> ApiJsonResult<Vec<usize>> {
    let permutation = with_bus(move |bus| Ok(bus.shift(req.offset, req.direction))).await?;
    Ok(Json(permutation))
}

async fn preview_page(Json(req): Json<PreviewRequest>) -> ApiJsonResult<Vec<usize>> {
    let page =
        with_bus(move |bus| bus.preview_page(parse_layout(req.layout)?, req.window)).await?;
    Ok(Json(page))
}
