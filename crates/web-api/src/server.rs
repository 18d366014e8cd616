use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

/// API server for the screener platform.
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Builds the router with all API routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/screener/run", post(handlers::run_screener))
            .route("/api/screener/fields", get(handlers::list_fields))
            .route("/api/alerts", get(handlers::list_alerts))
            .route("/api/alerts", post(handlers::create_alert))
            .route("/api/alerts/:id", get(handlers::get_alert))
            .route("/api/alerts/:id", put(handlers::update_alert))
            .route("/api/alerts/:id", delete(handlers::delete_alert))
            .route("/api/market/quote/:ticker", get(handlers::get_quote))
            .route("/api/market/movers", get(handlers::get_movers))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or
    /// serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Screener API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }

    /// Serves until the shutdown channel flips, then drains gracefully.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or
    /// serve requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Screener API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                tracing::info!("Screener API shutting down");
            })
            .await?;

        Ok(())
    }
}
