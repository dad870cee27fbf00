//! Forwarding server.
//!
//! The terminal client never holds the aggregator key. It posts each turn to
//! `/api/chat`; the server resolves the model against the catalog, applies
//! the priority temperature and relays the conversation upstream.

pub mod routes;
pub mod state;
pub mod upstream;

pub use routes::create_router;
pub use state::AppState;
pub use upstream::{AggregatorUpstream, Upstream, UpstreamError, UpstreamRequest};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Outcome of serving until shutdown.
pub type ServeResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Routes plus the layers every deployment gets: permissive CORS for browser
/// front ends and request tracing.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `0.0.0.0:port` and serve until `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the port cannot be bound or serving fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> ServeResult
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    serve(listener, state, shutdown_signal).await
}

/// Serve on an already bound listener. In-flight requests finish after
/// `shutdown_signal` completes; new connections are refused.
///
/// # Errors
/// Returns an error if serving fails.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_signal: F,
) -> ServeResult
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Parlor server forwarding on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedUpstream;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(Arc::new(ScriptedUpstream::new(vec![]))));
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, state, async move {
            let _ = stopped.await;
        }));

        let response = reqwest::Client::new()
            .get(format!("http://{addr}/health"))
            .header("Origin", "http://localhost:5173")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(response.headers().contains_key("access-control-allow-origin"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
