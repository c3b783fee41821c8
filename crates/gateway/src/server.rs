//! Router assembly and the serve/shutdown loop.

use std::time::Duration;

use {
    axum::Router,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        sensitive_headers::SetSensitiveHeadersLayer,
        trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    },
    tracing::{Level, info, warn},
};

use crate::{
    anthropic_routes, auth_routes, gemini_routes, openai_routes,
    state::SharedState,
    web,
};

/// In-flight streams get this long to finish after the listener stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Component shutdown after drain gets the remainder of this budget.
const HARD_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn build_router(state: SharedState) -> Router {
    let sensitive: [axum::http::HeaderName; 2] = [
        axum::http::header::AUTHORIZATION,
        axum::http::HeaderName::from_static("x-api-key"),
    ];

    Router::new()
        .merge(openai_routes::router())
        .merge(anthropic_routes::router())
        .merge(gemini_routes::router())
        .merge(auth_routes::router())
        .merge(web::router())
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(SetSensitiveHeadersLayer::new(sensitive))
        .layer(PropagateRequestIdLayer::new(
            axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
        ))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
            MakeRequestUuid,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until ctrl-c, then drain and shut components down.
pub async fn serve(state: SharedState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "courier listening");

    let app = build_router(state.clone());

    // The token fires on the shutdown signal; graceful shutdown then stops
    // accepting connections and in-flight streams get the drain window.
    let stopping = tokio_util::sync::CancellationToken::new();
    {
        let stopping = stopping.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            stopping.cancel();
        });
    }

    let graceful = {
        let stopping = stopping.clone();
        async move { stopping.cancelled().await }
    };
    let server = axum::serve(listener, app).with_graceful_shutdown(graceful);

    tokio::select! {
        result = server => result?,
        _ = async {
            stopping.cancelled().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            warn!("drain window exceeded, abandoning in-flight streams");
        },
    }

    tokio::time::timeout(HARD_TIMEOUT, state.shutdown())
        .await
        .unwrap_or_else(|_| warn!("component shutdown timed out"));
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, draining"),
        _ = terminate => info!("SIGTERM received, draining"),
    }
}
