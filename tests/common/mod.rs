//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use switchyard::config::AppConfig;
use switchyard::http::{handler_fn, BoxHandler};
use switchyard::lifecycle::Shutdown;
use switchyard::routing::Router;
use switchyard::security::RateLimiter;
use switchyard::HttpServer;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Serve `router` on 127.0.0.1 with an OS-assigned port.
#[allow(dead_code)]
pub async fn start_server(router: Router) -> TestServer {
    start_server_with(AppConfig::default(), router, None).await
}

#[allow(dead_code)]
pub async fn start_server_with(
    config: AppConfig,
    router: Router,
    limiter: Option<Arc<RateLimiter>>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut server = HttpServer::new(config, Arc::new(router));
    if let Some(limiter) = limiter {
        server = server.with_rate_limiter(limiter);
    }

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer { addr, shutdown, handle }
}

/// HTTP client that never reuses connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Handler answering 200 with a fixed body.
#[allow(dead_code)]
pub fn text(body: &'static str) -> BoxHandler {
    handler_fn(move |ctx| {
        Box::pin(async move {
            ctx.text(StatusCode::OK, body);
            Ok(())
        })
    })
}
