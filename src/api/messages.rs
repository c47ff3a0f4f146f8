//! Anthropic-dialect messages endpoint.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::AppState;
use crate::api::{SseAdapter, open_stream};
use crate::auth::{api_key_header, bearer_token, parse_api_key};
use crate::config::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::{Dialect, DialectError, GatewayError};
use crate::models::anthropic::MessagesRequest;
use crate::stream::anthropic::stream_to_anthropic;
use crate::stream::collect::collect_anthropic;

/// `POST /v1/messages`. Auth via `x-api-key` or `Authorization: Bearer`.
pub async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, DialectError> {
    let dialect = Dialect::Anthropic;
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let key = api_key_header(&headers)
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            GatewayError::Authentication("missing x-api-key or bearer token".into())
                .for_dialect(dialect)
        })?;
    let auth = parse_api_key(&key, &state.config.proxy_api_key)
        .map_err(|e| e.for_dialect(dialect))?;

    let request: MessagesRequest = serde_json::from_str(&body)
        .map_err(|e| GatewayError::Validation(e.to_string()).for_dialect(dialect))?;

    info!(
        model = request.model.as_str(),
        messages = request.messages.len(),
        stream = request.stream,
        "Messages request"
    );

    let canonical = crate::convert::anthropic::to_canonical(
        &request,
        state.config.tool_description_max_length,
    )
    .map_err(|e| e.for_dialect(dialect))?;

    let (reader, ctx) = open_stream(&state, &auth, &canonical)
        .await
        .map_err(|e| e.for_dialect(dialect))?;
    let frames = stream_to_anthropic(reader, ctx);

    if canonical.stream {
        Ok(Sse::new(SseAdapter::new(frames))
            .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE_INTERVAL))
            .into_response())
    } else {
        let response = collect_anthropic(frames)
            .await
            .map_err(|e| e.for_dialect(dialect))?;
        Ok(Json(response).into_response())
    }
}
