//! switchyard
//!
//! Serves a small demo site through the router.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                   SWITCHYARD                     │
//!                        │                                                  │
//!   Client Request       │  ┌──────────┐   ┌────────────┐   ┌───────────┐   │
//!   ─────────────────────┼─▶│  axum    │──▶│ dispatcher │──▶│  routing  │   │
//!                        │  │  host    │   │            │   │  (match)  │   │
//!                        │  └──────────┘   └─────┬──────┘   └───────────┘   │
//!                        │                       │                          │
//!                        │                       ▼                          │
//!                        │        global middleware → route middleware      │
//!                        │                  → handler                       │
//!                        │                       │                          │
//!   Client Response      │  ┌──────────┐   ┌─────▼──────┐                   │
//!   ◀────────────────────┼──│ collector│◀──│  response  │                   │
//!                        │  │  (sink)  │   │  buffer    │                   │
//!                        │  └──────────┘   └────────────┘                   │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use switchyard::config::{load_config, validation::validate_config, AppConfig, ConfigError};
use switchyard::http::middleware::{
    cache, default_recoverer, gzip, request_logger, sessions, MemorySessionStore, SessionConfig,
};
use switchyard::http::{handler_fn, HandlerError, TracingLogger};
use switchyard::lifecycle::Shutdown;
use switchyard::observability::{logging, metrics};
use switchyard::routing::{RouteError, Router};
use switchyard::security::{allow_content_type, x_frame_options, RateLimiter, XFrameOption};
use switchyard::HttpServer;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "HTTP request router with middleware groups and rate limiting", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init(&config.observability);
    tracing::info!("switchyard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let limiter = config
        .rate_limit
        .enabled
        .then(|| Arc::new(RateLimiter::new(config.rate_limit.clone())));
    let session_store = Arc::new(MemorySessionStore::new());
    let router = Arc::new(build_router(&config, limiter.as_ref(), &session_store)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let mut server = HttpServer::new(config, router);
    if let Some(limiter) = limiter {
        server = server.with_rate_limiter(limiter);
    }
    let shutdown = Shutdown::new();
    let purger = session_store.spawn_purger(SESSION_PURGE_INTERVAL, shutdown.subscribe());
    server.run(listener, shutdown).await?;
    if let Err(e) = purger.await {
        tracing::warn!(error = %e, "Session purger task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(
    config: &AppConfig,
    limiter: Option<&Arc<RateLimiter>>,
    session_store: &Arc<MemorySessionStore>,
) -> Result<Router, RouteError> {
    let mut builder = Router::builder(config.router.clone());
    builder.logger(Arc::new(TracingLogger));

    builder.use_middleware([request_logger(), default_recoverer(), gzip()]);
    if let Some(limiter) = limiter {
        builder.use_middleware([limiter.middleware()]);
    }
    builder.use_middleware([
        x_frame_options(XFrameOption::SameOrigin),
        sessions(session_store.clone(), SessionConfig::default()),
    ]);

    builder
        .get(
            "/",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let first_post = ctx.url("posts:post", &[&1])?;
                    ctx.text(StatusCode::OK, &format!("switchyard\nfirst post: {first_post}\n"));
                    Ok::<_, HandlerError>(())
                })
            }),
        )
        .name("home");

    builder
        .get(
            "/health",
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.text(StatusCode::OK, "ok");
                    Ok(())
                })
            }),
        )
        .name("health")
        .disable_middleware();

    builder
        .get(
            "/visits",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let Some(session) = ctx.session.as_mut() else {
                        return Err(HandlerError::status(StatusCode::INTERNAL_SERVER_ERROR, "sessions not installed"));
                    };
                    let visits = session.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
                    session.set("visits", json!(visits));
                    ctx.json(StatusCode::OK, &json!({ "visits": visits }))
                })
            }),
        )
        .name("visits");

    {
        let mut posts = builder.group("/posts", "posts", vec![cache(Duration::from_secs(60))]);
        posts
            .get(
                "/<id:int>",
                handler_fn(|ctx| {
                    Box::pin(async move {
                        let id: i64 = ctx
                            .params()
                            .parse("id")
                            .ok_or_else(|| HandlerError::status(StatusCode::BAD_REQUEST, "invalid post id"))?;
                        let next_id = id
                            .checked_add(1)
                            .ok_or_else(|| HandlerError::status(StatusCode::NOT_FOUND, "no next post"))?;
                        let next = ctx.url("posts:post", &[&next_id])?;
                        ctx.json(StatusCode::OK, &json!({ "id": id, "next": next }))
                    })
                }),
            )
            .name("post");
    }

    builder
        .post(
            "/posts",
            handler_fn(|ctx| {
                Box::pin(async move {
                    let post: Value = serde_json::from_slice(ctx.body())
                        .map_err(|e| HandlerError::status(StatusCode::BAD_REQUEST, e.to_string()))?;
                    ctx.json(StatusCode::CREATED, &json!({ "created": post }))
                })
            }),
        )
        .name("create_post")
        .use_middleware([allow_content_type(["application/json"])]);

    builder.build()
}
