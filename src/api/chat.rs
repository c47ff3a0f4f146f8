//! OpenAI-dialect chat completion endpoint.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::AppState;
use crate::api::{SseAdapter, open_stream};
use crate::auth::{bearer_token, parse_api_key};
use crate::config::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::{Dialect, DialectError, GatewayError};
use crate::models::openai::ChatRequest;
use crate::stream::collect::collect_openai;
use crate::stream::openai::stream_to_openai;

/// `POST /v1/chat/completions`. Auth via `Authorization: Bearer`.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, DialectError> {
    let dialect = Dialect::OpenAi;
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let key = bearer_token(&headers).ok_or_else(|| {
        GatewayError::Authentication("missing Authorization bearer token".into())
            .for_dialect(dialect)
    })?;
    let auth = parse_api_key(&key, &state.config.proxy_api_key)
        .map_err(|e| e.for_dialect(dialect))?;

    let request: ChatRequest = serde_json::from_str(&body)
        .map_err(|e| GatewayError::Validation(e.to_string()).for_dialect(dialect))?;

    info!(
        model = request.model.as_str(),
        messages = request.messages.len(),
        stream = request.stream,
        "Chat completion request"
    );

    let canonical =
        crate::convert::openai::to_canonical(&request, state.config.tool_description_max_length)
            .map_err(|e| e.for_dialect(dialect))?;

    let (reader, ctx) = open_stream(&state, &auth, &canonical)
        .await
        .map_err(|e| e.for_dialect(dialect))?;
    let frames = stream_to_openai(reader, ctx);

    if canonical.stream {
        Ok(Sse::new(SseAdapter::new(frames))
            .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE_INTERVAL))
            .into_response())
    } else {
        let completion = collect_openai(frames)
            .await
            .map_err(|e| e.for_dialect(dialect))?;
        Ok(Json(completion).into_response())
    }
}
