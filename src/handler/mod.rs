use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use stream_core::frame::ElementId;

pub mod channel;
pub mod system;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

#[derive(Debug, thiserror::Error)]
#[error("element {0} is not a source of this graph")]
pub struct UnknownElement(pub ElementId);

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: message.into(),
            slot: None,
        }
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }
}

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<UnknownElement>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<stream_core::Error>() {
            Some(stream_core::Error::ConfigInvalid(_)) | Some(stream_core::Error::Json(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(stream_core::Error::ChannelNotFound(_)) => StatusCode::NOT_FOUND,
            Some(stream_core::Error::AlreadyRunning(_))
            | Some(stream_core::Error::InvalidState { .. }) => StatusCode::CONFLICT,
            Some(stream_core::Error::InitFailed { .. }) => StatusCode::BAD_GATEWAY,
            Some(stream_core::Error::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("ApiError: {:?}", self.0);
        } else {
            log::warn!("ApiError: {}", self.0);
        }
        let body = ApiResponse {
            code: status.as_u16(),
            message: self.0.to_string(),
            slot: None,
        };
        (status, Json(body)).into_response()
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
