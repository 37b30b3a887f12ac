use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use decode_bus::BusError;
use serde::Serialize;

pub mod audio;
pub mod system;
pub mod window;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self.0.downcast_ref::<BusError>() {
            Some(e) => (status_of(e), e.code()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, -100),
        };
        if status.is_server_error() {
            log::error!("ApiError: {:?}", self.0);
        } else {
            log::debug!("ApiError: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                code,
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn status_of(err: &BusError) -> StatusCode {
    match err {
        BusError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        BusError::NoFreeChannel { .. } | BusError::ChannelNotActive(_) => StatusCode::CONFLICT,
        BusError::NoCapacity { .. } | BusError::AudioBufferFull => StatusCode::SERVICE_UNAVAILABLE,
        BusError::PipelineCreationFailed(_)
        | BusError::DecodeEngine(_)
        | BusError::AudioPipeline(_)
        | BusError::Display(_) => StatusCode::BAD_GATEWAY,
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_keep_their_code() {
        let response = ApiError::from(BusError::ChannelNotActive(3)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = ApiError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
