use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{info, warn, Level};

use crate::{AppConfig, PriceResolver};

pub mod handlers;
pub mod responses;

pub use handlers::{get_price, health_check, list_retailers, PriceParams};
pub use responses::*;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PriceResolver>,
    pub config: AppConfig,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/get-price", get(get_price))
        .route("/api/v1/retailers", get(list_retailers))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)))
                .layer(CorsLayer::permissive())
        )
        .with_state(state)
}

/// Serve the API until `signal` resolves, then drain connections.
///
/// The render pool is closed as soon as the signal fires, not after the
/// drain, so requests still waiting for a context fail with 503 instead of
/// sitting out the acquire timeout.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let resolver = Arc::clone(&state.resolver);
    let (closing_tx, closing_rx) = oneshot::channel();

    let on_signal = {
        let resolver = Arc::clone(&resolver);
        async move {
            signal.await;
            info!("Shutdown requested, closing render pool");
            let closing = tokio::spawn(async move { resolver.shutdown().await });
            let _ = closing_tx.send(closing);
        }
    };

    let result = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(on_signal)
        .await;

    match closing_rx.await {
        Ok(closing) => {
            if let Err(e) = closing.await {
                warn!("Render pool shutdown task failed: {}", e);
            }
        }
        // The server stopped before any signal arrived.
        Err(_) => resolver.shutdown().await,
    }

    result
}
