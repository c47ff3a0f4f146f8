//! Gemini-dialect generateContent endpoints.
//!
//! The path segment packs model and action (`{model}:generateContent` or
//! `{model}:streamGenerateContent`); the action decides streaming.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::api::{SseAdapter, open_stream};
use crate::auth::{bearer_token, parse_api_key};
use crate::config::SSE_KEEP_ALIVE_INTERVAL;
use crate::error::{Dialect, DialectError, GatewayError};
use crate::models::gemini::GenerateContentRequest;
use crate::stream::collect::collect_gemini;
use crate::stream::gemini::stream_to_gemini;

#[derive(Debug, Deserialize)]
pub struct GeminiQuery {
    #[serde(default)]
    key: Option<String>,
}

/// `POST /v1beta/models/{model}:generateContent` and
/// `POST /v1beta/models/{model}:streamGenerateContent`.
/// Auth via `?key=` or `Authorization: Bearer`.
pub async fn generate_content(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(query): Query<GeminiQuery>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, DialectError> {
    let dialect = Dialect::Gemini;
    state.requests_served.fetch_add(1, Ordering::Relaxed);

    let (model, action) = model_action.split_once(':').ok_or_else(|| {
        GatewayError::Validation("expected {model}:generateContent".into()).for_dialect(dialect)
    })?;
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return Err(GatewayError::Validation(format!("unknown action: {other}"))
                .for_dialect(dialect));
        }
    };

    let key = query
        .key
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            GatewayError::Authentication("missing ?key= or bearer token".into())
                .for_dialect(dialect)
        })?;
    let auth = parse_api_key(&key, &state.config.proxy_api_key)
        .map_err(|e| e.for_dialect(dialect))?;

    let request: GenerateContentRequest = serde_json::from_str(&body)
        .map_err(|e| GatewayError::Validation(e.to_string()).for_dialect(dialect))?;

    info!(
        model = model,
        contents = request.contents.len(),
        stream,
        "generateContent request"
    );

    let canonical = crate::convert::gemini::to_canonical(
        model,
        &request,
        stream,
        state.config.tool_description_max_length,
    )
    .map_err(|e| e.for_dialect(dialect))?;

    let (reader, ctx) = open_stream(&state, &auth, &canonical)
        .await
        .map_err(|e| e.for_dialect(dialect))?;
    let frames = stream_to_gemini(reader, ctx);

    if stream {
        Ok(Sse::new(SseAdapter::new(frames))
            .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE_INTERVAL))
            .into_response())
    } else {
        let response = collect_gemini(frames)
            .await
            .map_err(|e| e.for_dialect(dialect))?;
        Ok(Json(response).into_response())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_model_action_split() {
        let (model, action) = "claude-sonnet-4-5:streamGenerateContent"
            .split_once(':')
            .unwrap();
        assert_eq!(model, "claude-sonnet-4-5");
        assert_eq!(action, "streamGenerateContent");
    }
}
