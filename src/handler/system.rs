use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::{handler::ApiJsonResult, manager};

pub fn system_router() -> Router {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    sources: Vec<u32>,
}

async fn health() -> ApiJsonResult<Health> {
    Ok(Json(Health {
        status: "ok",
        sources: manager::source_ids().await,
    }))
}
