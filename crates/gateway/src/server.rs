use std::{any::Any, net::SocketAddr};

use {
    axum::{
        Json, Router,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde_json::json,
    tokio::signal,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any as AnyOrigin, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info, warn},
};

use {
    relay_config::RelayConfig,
    relay_whatsapp::{
        MessageDispatcher, ReconnectPolicy, SessionManager, SessionStateStore,
        provider_from_config,
    },
};

use crate::{handlers, state::AppState};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/send-message", post(handlers::send_message))
        .route("/check-number", post(handlers::check_number))
        .route("/restart", post(handlers::restart))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "unknown panic".into());
    error!(detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error", "details": detail })),
    )
        .into_response()
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Start the session and serve the HTTP API until Ctrl+C or SIGTERM.
pub async fn start_gateway(config: RelayConfig, bind: &str, port: u16) -> anyhow::Result<()> {
    let provider = provider_from_config(&config.provider);
    let store = SessionStateStore::from_config(&config.session);
    let policy = ReconnectPolicy::from_config(&config.session);
    let data_dir = store.data_dir().to_path_buf();

    let manager = SessionManager::spawn(provider, store, policy);
    let dispatcher = MessageDispatcher::from_config(manager.clone(), &config.dispatch);
    let app = build_gateway_app(AppState::new(dispatcher));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("relay gateway v{}", env!("CARGO_PKG_VERSION")),
        format!("listening on http://{addr}"),
        format!("provider: {}", manager.provider_name()),
        format!("session data: {}", data_dir.display()),
        format!(
            "max reconnect attempts: {}",
            config.session.max_reconnect_attempts
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    manager.initialize(false);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down session");
    manager.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
