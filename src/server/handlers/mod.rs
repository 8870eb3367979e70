//! HTTP 请求处理器
//!
//! - `chat_completions`: OpenAI 端点
//! - `messages`: Anthropic 端点（含 `/messages` 别名）
//! - `meta`: 健康检查、模型列表、指标

pub mod chat_completions;
pub mod messages;
pub mod meta;

use crate::config::Settings;
use crate::converter::build_kiro_payload;
use crate::error::GatewayError;
use crate::models::openai::ChatCompletionRequest;
use crate::models::ApiDialect;
use crate::resilience::{DispatchPolicy, PrimedStream, RetryDispatcher, StreamReadGuard};
use crate::server::auth::Caller;
use crate::server::AppState;
use crate::stream::{collect_turn, estimate_prompt_tokens, CompletedTurn};
use crate::telemetry::{MetricsAggregator, RequestRecord};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

/// 计时并在请求结束时写入指标
pub(crate) struct RequestTimer {
    metrics: Arc<MetricsAggregator>,
    record: RequestRecord,
    started: Instant,
}

impl RequestTimer {
    pub(crate) fn start(state: &AppState, path: &str, dialect: ApiDialect) -> Self {
        Self {
            metrics: state.metrics.clone(),
            record: RequestRecord::new("POST", path, dialect, false),
            started: Instant::now(),
        }
    }

    pub(crate) fn describe(&mut self, model: &str, streaming: bool) {
        self.record.model = Some(model.to_string());
        self.record.streaming = streaming;
    }

    pub(crate) fn finish(self, status: u16, error: Option<String>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.metrics
            .record(self.record.finish(status, duration_ms, error));
    }

    /// 以错误结束并生成对应方言的错误响应
    pub(crate) fn fail(self, err: GatewayError) -> Response {
        let dialect = self.record.dialect;
        let status = err.status_code();
        if status >= 500 {
            tracing::error!("[{}] 请求失败 ({}): {}", dialect_tag(dialect), status, err);
        } else {
            tracing::warn!("[{}] 请求失败 ({}): {}", dialect_tag(dialect), status, err);
        }
        self.finish(status, Some(err.to_string()));
        error_response(dialect, &err)
    }
}

fn dialect_tag(dialect: ApiDialect) -> &'static str {
    match dialect {
        ApiDialect::OpenAi => "OPENAI",
        ApiDialect::Anthropic => "ANTHROPIC",
    }
}

/// 上游调用结果
pub(crate) enum ModelResponse {
    /// 已收到首 token 的流
    Stream(PrimedStream),
    /// 完整读取的响应
    Full(CompletedTurn),
}

/// 构建会话请求并发送
pub(crate) async fn run_model_request(
    state: &AppState,
    caller: &Caller,
    request: &ChatCompletionRequest,
) -> Result<ModelResponse, GatewayError> {
    let tokens = state.tenants.resolve(caller.tenant_refresh.as_deref());
    let conversation_id = uuid::Uuid::new_v4().to_string();
    let profile_arn = tokens.profile_arn().await;
    let payload = build_kiro_payload(request, &conversation_id, profile_arn.as_deref())?;

    let dispatcher = RetryDispatcher::new(
        state.upstream.clone(),
        DispatchPolicy::from_settings(&state.settings, request.stream),
    );

    if request.stream {
        let primed = dispatcher.dispatch_primed(tokens.as_ref(), &payload).await?;
        Ok(ModelResponse::Stream(primed))
    } else {
        let response = dispatcher.dispatch(tokens.as_ref(), &payload).await?;
        let turn = collect_turn(
            response.body,
            read_guard(&state.settings),
            estimate_prompt_tokens(request),
        )
        .await?;
        Ok(ModelResponse::Full(turn))
    }
}

pub(crate) fn read_guard(settings: &Settings) -> StreamReadGuard {
    StreamReadGuard::new(settings.stream_read_timeout())
}

pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid request body: {e}")))
}

pub(crate) fn error_response(dialect: ApiDialect, err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match dialect {
        ApiDialect::OpenAi => err.to_openai_json(),
        ApiDialect::Anthropic => err.to_anthropic_json(),
    };
    (status, Json(body)).into_response()
}

/// SSE 响应
pub(crate) fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<String, Infallible>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": {"message": "Failed to build streaming response"}})),
            )
                .into_response()
        })
}
