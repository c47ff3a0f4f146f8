//! HTTP surface.
//!
//! Thin axum handlers per dialect; all protocol work happens in the
//! converter and pipeline modules.

pub mod chat;
pub mod gemini;
pub mod health;
pub mod messages;
pub mod models;

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::Router;
use axum::response::sse::Event;
use axum::routing::{get, post};
use futures::Stream;

use crate::AppState;
use crate::stream::SseMsg;

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /v1/chat/completions                        POST  (OpenAI dialect)
/// /v1/messages                                POST  (Anthropic dialect)
/// /v1beta/models/{model:action}               POST  (Gemini dialect)
/// /v1/models                                  GET
/// /health /metrics /                          GET   (informational)
/// ```
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/messages", post(messages::create_message))
        .route("/v1beta/models/{model_action}", post(gemini::generate_content))
        .route("/v1/models", get(models::list_models))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/", get(health::root))
}

// ---------------------------------------------------------------------------
// Shared request driving
// ---------------------------------------------------------------------------

use std::sync::Arc;

use crate::auth::ClientAuth;
use crate::error::GatewayError;
use crate::models::canonical::CanonicalRequest;
use crate::stream::{EventReader, StreamContext, usage};
use crate::upstream::client::UpstreamClient;

/// Authenticate against the upstream, build the payload, and open the
/// event stream with first-token retry. Everything downstream of this is
/// dialect framing.
pub(crate) async fn open_stream(
    state: &AppState,
    auth: &ClientAuth,
    canonical: &CanonicalRequest,
) -> Result<(EventReader, StreamContext), GatewayError> {
    let manager = crate::auth::resolve_manager(state, auth).await?;
    let payload = Arc::new(crate::convert::request::build_payload(
        canonical,
        manager.profile_arn().await,
    )?);
    let client = Arc::new(UpstreamClient::new(manager, (*state.config).clone()));
    let model = canonical.model.clone();

    let reader = crate::stream::start_with_retry(
        move || {
            let client = client.clone();
            let payload = payload.clone();
            let model = model.clone();
            async move { client.stream_request(&payload, &model).await }
        },
        &state.config,
        &canonical.model,
    )
    .await?;

    let ctx = StreamContext::new(
        &canonical.model,
        usage::estimate_prompt_tokens(canonical),
        state.config.default_max_input_tokens,
    );
    Ok((reader, ctx))
}

// ---------------------------------------------------------------------------
// SseAdapter -- SseMsg to axum::Event
// ---------------------------------------------------------------------------

/// Converts a `Stream<Item = SseMsg>` into the
/// `Stream<Item = Result<Event, Infallible>>` that `Sse::new` requires.
/// Tests assert on [`SseMsg`] values; this adapter only runs at the edge.
pub struct SseAdapter<S> {
    inner: Pin<Box<S>>,
}

impl<S> SseAdapter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<S: Stream<Item = SseMsg>> Stream for SseAdapter<S> {
    type Item = Result<Event, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(SseMsg::Event { event, data })) => {
                let mut out = Event::default().data(data);
                if let Some(name) = event {
                    out = out.event(name);
                }
                Poll::Ready(Some(Ok(out)))
            }
            Poll::Ready(Some(SseMsg::Done)) => {
                Poll::Ready(Some(Ok(Event::default().data("[DONE]"))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
