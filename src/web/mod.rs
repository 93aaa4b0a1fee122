//! Web server module.

mod handlers;

use crate::cache::SeriesCache;
use crate::exporter::Metrics;

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub cache: Arc<SeriesCache>,
}

/// HTTP surface of the exporter.
pub struct Server {
    listen_address: String,
    state: AppState,
}

impl Server {
    pub fn new(listen_address: String, metrics: Arc<Metrics>, cache: Arc<SeriesCache>) -> Self {
        Self {
            listen_address,
            state: AppState { metrics, cache },
        }
    }

    /// Build the router with all routes.
    pub(crate) fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_index))
            .route("/metrics", get(handlers::handle_metrics))
            .route("/stats", get(handlers::handle_stats))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.listen_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Starting HTTP server");
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
