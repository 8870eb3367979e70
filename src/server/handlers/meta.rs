//! 健康检查、模型列表与指标

use crate::models::model_map::available_models;
use crate::server::auth::verify_bearer;
use crate::server::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if verify_bearer(&headers, &state.settings.proxy_api_key).is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    let created = chrono::Utc::now().timestamp();
    let data: Vec<_> = available_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "anthropic"
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data })).into_response()
}

/// 内存中的聚合指标（只读）
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not Found"})))
}
