//! OpenAI Chat Completions 端点

use super::{
    parse_body, read_guard, run_model_request, sse_response, ModelResponse, RequestTimer,
};
use crate::error::GatewayError;
use crate::models::openai::ChatCompletionRequest;
use crate::models::ApiDialect;
use crate::server::auth::verify_bearer;
use crate::server::AppState;
use crate::stream::generators::openai_sse::build_chat_completion;
use crate::stream::{create_sse_stream, estimate_prompt_tokens, PipelineConfig};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
    Json,
};

pub async fn chat_completions(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut timer = RequestTimer::start(&state, uri.path(), ApiDialect::OpenAi);

    let Some(caller) = verify_bearer(&headers, &state.settings.proxy_api_key) else {
        return timer.fail(GatewayError::Authentication);
    };

    let request: ChatCompletionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return timer.fail(e),
    };
    timer.describe(&request.model, request.stream);

    tracing::info!(
        "[OPENAI] POST {} model={} stream={} messages={}",
        uri.path(),
        request.model,
        request.stream,
        request.messages.len()
    );

    match run_model_request(&state, &caller, &request).await {
        Ok(ModelResponse::Full(turn)) => {
            timer.finish(200, None);
            Json(build_chat_completion(&turn, &request.model)).into_response()
        }
        Ok(ModelResponse::Stream(primed)) => {
            let config = PipelineConfig::new(
                ApiDialect::OpenAi,
                request.model.clone(),
                estimate_prompt_tokens(&request),
            );
            let stream = create_sse_stream(primed, config, read_guard(&state.settings), move |summary| {
                timer.finish(200, summary.error)
            });
            sse_response(stream)
        }
        Err(e) => timer.fail(e),
    }
}
