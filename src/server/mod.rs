//! HTTP 服务器
//!
//! 路由表：
//!
//! | 方法 | 路径 | 认证 |
//! |------|------|------|
//! | POST | `/v1/chat/completions` | Bearer |
//! | POST | `/v1/messages`, `/messages` | x-api-key 或 Bearer |
//! | GET | `/v1/models` | Bearer |
//! | GET | `/health` | 无 |
//! | GET | `/api/metrics` | 无 |

pub mod auth;
pub mod handlers;

use crate::backends::Upstream;
use crate::config::{Settings, MAX_BODY_BYTES};
use crate::credential::TenantCache;
use crate::telemetry::MetricsAggregator;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use handlers::{chat_completions, messages, meta};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// 请求处理共享状态
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tenants: Arc<TenantCache>,
    pub upstream: Arc<dyn Upstream>,
    pub metrics: Arc<MetricsAggregator>,
}

impl AppState {
    pub fn new(settings: Settings, tenants: TenantCache, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            settings: Arc::new(settings),
            tenants: Arc::new(tenants),
            upstream,
            metrics: Arc::new(MetricsAggregator::default()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(meta::health))
        .route("/v1/models", get(meta::models))
        .route("/api/metrics", get(meta::metrics))
        .route("/v1/chat/completions", post(chat_completions::chat_completions))
        .route("/v1/messages", post(messages::messages))
        .route("/messages", post(messages::messages))
        .fallback(meta::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 绑定端口并运行直到出错
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[SERVER] 监听 {} (upstream={})", addr, state.upstream.name());
    axum::serve(listener, build_router(state)).await
}
