//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum app that feeds every request into [`Router::dispatch`]
//! - Wire up tower layers (timeout, request ID, tracing)
//! - Read request bodies up to the configured limit
//! - Bind server to listener with graceful shutdown
//! - Run background tasks (rate-limit eviction)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::upgrade::OnUpgrade;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::http::buffer::ResponseCollector;
use crate::lifecycle::Shutdown;
use crate::routing::Router;
use crate::security::RateLimiter;

/// Application state injected into the dispatch handler.
#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    max_body_bytes: usize,
}

/// HTTP host for a [`Router`].
pub struct HttpServer {
    app: axum::Router,
    config: AppConfig,
    router: Arc<Router>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl HttpServer {
    pub fn new(config: AppConfig, router: Arc<Router>) -> Self {
        let state = AppState {
            router: Arc::clone(&router),
            max_body_bytes: config.listener.max_body_bytes,
        };
        let app = Self::build_app(&config, state);
        Self {
            app,
            config,
            router,
            rate_limiter: None,
        }
    }

    /// Evict idle clients of `limiter` in the background while serving.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Build the Axum app with all middleware layers.
    #[allow(deprecated)]
    fn build_app(config: &AppConfig, state: AppState) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Run the server until `shutdown` fires or Ctrl+C is received.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.router.len(),
            "HTTP server starting"
        );
        self.router.log_routes();

        let evictor = self
            .rate_limiter
            .as_ref()
            .map(|limiter| limiter.spawn_evictor(shutdown.subscribe()));

        let app = self.app.into_make_service_with_connect_info::<SocketAddr>();
        let signal = shutdown.signalled();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        // Stop background tasks if the server exited on its own.
        shutdown.trigger();
        if let Some(evictor) = evictor {
            let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
            if tokio::time::timeout(grace, evictor).await.is_err() {
                tracing::warn!("Rate limit evictor did not stop within the grace period");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

/// Buffer the body, dispatch through the router and return what the
/// response collector assembled.
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (mut parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                path = %parts.uri.path(),
                limit = state.max_body_bytes,
                error = %e,
                "Failed to read request body"
            );
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }
    };

    let upgrade = parts.extensions.remove::<OnUpgrade>();
    let request = Request::from_parts(parts, body);

    let (collector, rx) = ResponseCollector::channel();
    let sink = collector.with_upgrade(upgrade);

    if let Err(e) = state.router.dispatch(request, Box::new(sink)).await {
        tracing::error!(error = %e, "Unhandled failure while dispatching request");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    match rx.await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!("Response was never committed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
