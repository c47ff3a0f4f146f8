//! kiro-relay -- entry point.
//!
//! Wires together configuration, tracing, shared state, and the HTTP
//! server, then serves until SIGTERM / SIGINT.

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kiro_relay::AppState;
use kiro_relay::api;
use kiro_relay::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration from the environment.
    let config = Config::from_env();

    // 2. Initialize tracing. RUST_LOG takes precedence over LOG_LEVEL.
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        region = config.region.as_str(),
        "Starting kiro-relay"
    );

    if config.proxy_api_key.is_empty() {
        tracing::warn!("PROXY_API_KEY is not set -- all requests will be rejected");
    }
    if config.rate_limit_per_minute > 0 {
        tracing::warn!(
            limit = config.rate_limit_per_minute,
            "RATE_LIMIT_PER_MINUTE is set but rate limiting is not enforced"
        );
    }

    // 3. Build shared state (credential manager, tenant cache).
    let state = AppState::from_config(config.clone()).await;
    if state.global_manager.is_none() {
        tracing::info!("Running in multi-tenant-only mode (no REFRESH_TOKEN configured)");
    }

    // 4. Assemble the router with the middleware stack.
    let app = build_app(state);

    // 5. Bind and serve with graceful shutdown.
    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  kiro-relay v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  OpenAI:    http://{listen_addr}/v1/chat/completions");
    println!("  Anthropic: http://{listen_addr}/v1/messages");
    println!("  Gemini:    http://{listen_addr}/v1beta/models/{{model}}:generateContent");
    println!("  Health:    http://{listen_addr}/health");
    println!();

    // Streamed completions can stall up to SERVER_IDLE_TIMEOUT on slow
    // models. The hyper server behind `axum::serve` applies no idle timeout
    // of its own to an established connection with an in-flight response,
    // so nothing here cuts a stalled stream; the SSE handlers additionally
    // emit keep-alive comments every SSE_KEEP_ALIVE_INTERVAL so the
    // connection never looks idle to clients or intermediaries either.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

/// Build the application router with CORS, request-id, and trace layers.
fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::build_router()
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Set up the tracing subscriber from LOG_LEVEL / RUST_LOG.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.log_level;
        EnvFilter::new(format!("kiro_relay={level},tower_http=warn,warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
