use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Path,
    routing::{get, post},
};
use serde::Serialize;
use stream_core::{
    channel::{ChannelRequest, ChannelStatus, StartStatus},
    frame::{ElementId, StreamId},
    source::SourceElement,
};

use crate::{
    handler::{ApiJsonResult, ApiResponse, ApiResult, UnknownElement},
    manager,
};

pub fn channel_router() -> Router {
    Router::new()
        .route("/{element_id}/start", post(start_channel))
        .route("/{element_id}/list", get(list_channels))
        .route("/{element_id}/{stream_id}/status", get(channel_status))
        .route("/{element_id}/{stream_id}/stop", post(stop_channel))
        .route("/{element_id}/{stream_id}/pause", post(pause_channel))
        .route("/{element_id}/{stream_id}/resume", post(resume_channel))
}

#[derive(Debug, Serialize)]
pub struct ChannelView {
    pub stream_id: StreamId,
    pub slot: usize,
    pub state: &'static str,
}

impl From<ChannelStatus> for ChannelView {
    fn from(status: ChannelStatus) -> Self {
        Self {
            stream_id: status.stream_id,
            slot: status.slot,
            state: status.state.as_str(),
        }
    }
}

async fn source(element_id: ElementId) -> ApiResult<Arc<SourceElement>> {
    manager::get_source(element_id)
        .await
        .ok_or_else(|| UnknownElement(element_id).into())
}

async fn start_channel(
    Path(element_id): Path<ElementId>,
    Json(body): Json<serde_json::Value>,
) -> ApiJsonResult<ApiResponse> {
    let source = source(element_id).await?;
    let request = ChannelRequest::from_value(body)?;
    let response = match source.manager().start(request).await? {
        StartStatus::Started { stream_id, slot } => {
            ApiResponse::ok(format!("channel {} started", stream_id)).with_slot(slot)
        }
        StartStatus::AlreadyRunning { stream_id, slot } => {
            ApiResponse::ok(format!("channel {} is already running", stream_id)).with_slot(slot)
        }
    };
    Ok(Json(response))
}

async fn stop_channel(
    Path((element_id, stream_id)): Path<(ElementId, StreamId)>,
) -> ApiJsonResult<ApiResponse> {
    source(element_id).await?.manager().stop(stream_id).await?;
    Ok(Json(ApiResponse::ok(format!("channel {} stopped", stream_id))))
}

async fn pause_channel(
    Path((element_id, stream_id)): Path<(ElementId, StreamId)>,
) -> ApiJsonResult<ApiResponse> {
    source(element_id).await?.manager().pause(stream_id)?;
    Ok(Json(ApiResponse::ok(format!("channel {} paused", stream_id))))
}

async fn resume_channel(
    Path((element_id, stream_id)): Path<(ElementId, StreamId)>,
) -> ApiJsonResult<ApiResponse> {
    source(element_id).await?.manager().resume(stream_id)?;
    Ok(Json(ApiResponse::ok(format!("channel {} resumed", stream_id))))
}

async fn list_channels(Path(element_id): Path<ElementId>) -> ApiJsonResult<Vec<ChannelView>> {
    let source = source(element_id).await?;
    Ok(Json(
        source
            .manager()
            .channels()
            .into_iter()
            .map(ChannelView::from)
            .collect(),
    ))
}

async fn channel_status(
    Path((element_id, stream_id)): Path<(ElementId, StreamId)>,
) -> ApiJsonResult<ChannelView> {
    let status = source(element_id)
        .await?
        .manager()
        .status(stream_id)
        .ok_or(stream_core::Error::ChannelNotFound(stream_id))?;
    Ok(Json(status.into()))
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod channel_test;
