//! Anthropic Messages 端点
//!
//! 请求先转换为统一格式，之后与 OpenAI 端点共用同一条上游路径。

use super::{
    parse_body, read_guard, run_model_request, sse_response, ModelResponse, RequestTimer,
};
use crate::converter::convert_anthropic_to_openai;
use crate::error::GatewayError;
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::models::ApiDialect;
use crate::server::auth::verify_anthropic;
use crate::server::AppState;
use crate::stream::generators::anthropic_sse::build_message;
use crate::stream::{create_sse_stream, estimate_prompt_tokens, PipelineConfig};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
    Json,
};

pub async fn messages(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut timer = RequestTimer::start(&state, uri.path(), ApiDialect::Anthropic);

    let Some(caller) = verify_anthropic(&headers, &state.settings.proxy_api_key) else {
        return timer.fail(GatewayError::Authentication);
    };

    let request: AnthropicMessagesRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return timer.fail(e),
    };
    timer.describe(&request.model, request.stream);

    tracing::info!(
        "[ANTHROPIC] POST {} model={} stream={} messages={}",
        uri.path(),
        request.model,
        request.stream,
        request.messages.len()
    );

    let unified = convert_anthropic_to_openai(&request);

    match run_model_request(&state, &caller, &unified).await {
        Ok(ModelResponse::Full(turn)) => {
            timer.finish(200, None);
            Json(build_message(&turn, &request.model)).into_response()
        }
        Ok(ModelResponse::Stream(primed)) => {
            let config = PipelineConfig::new(
                ApiDialect::Anthropic,
                request.model.clone(),
                estimate_prompt_tokens(&unified),
            );
            let stream = create_sse_stream(primed, config, read_guard(&state.settings), move |summary| {
                timer.finish(200, summary.error)
            });
            sse_response(stream)
        }
        Err(e) => timer.fail(e),
    }
}
