//! Per-client rate limiting middleware.
//!
//! # Responsibilities
//! - Keep one token bucket per client key
//! - Derive the client key from the peer address, proxy headers or a cookie
//! - Evict clients that have been idle longer than the configured expiry
//!
//! # Design Decisions
//! - One mutex around the visitor map; lookups and refills are O(1)
//! - Buckets start full (burst = rps × multiplier) and refill continuously
//! - A poisoned lock is recovered, not propagated
//! - The evictor is a tokio task that exits on the shutdown broadcast

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::http::StatusCode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{RateLimitConfig, RateLimitKey};
use crate::http::cookie::SetCookie;
use crate::http::context::RequestContext;
use crate::http::handler::{middleware_fn, BoxHandler, Middleware};
use crate::observability::metrics;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = self.last_update.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Visitor {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Token-bucket limiter keyed by client identity.
pub struct RateLimiter {
    visitors: Mutex<HashMap<String, Visitor>>,
    config: RateLimitConfig,
    limit_handler: Option<BoxHandler>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            config,
            limit_handler: None,
        }
    }

    /// Handler run instead of the default `429` when a client is over its limit.
    pub fn with_limit_handler(mut self, handler: BoxHandler) -> Self {
        self.limit_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn visitors(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        self.visitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one token for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, now())
    }

    /// [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let burst = self.config.burst();
        let mut visitors = self.visitors();
        let visitor = visitors.entry(key.to_string()).or_insert_with(|| Visitor {
            bucket: TokenBucket::new(burst, now),
            last_seen: now,
        });
        visitor.last_seen = visitor.last_seen.max(now);
        visitor
            .bucket
            .try_acquire(now, burst, self.config.requests_per_second)
    }

    /// Number of clients currently tracked.
    pub fn visitor_count(&self) -> usize {
        self.visitors().len()
    }

    /// Drop every client idle for longer than the clean expiry.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let expiry = self.config.clean_expiry();
        let mut visitors = self.visitors();
        let before = visitors.len();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= expiry);
        let evicted = before - visitors.len();
        metrics::record_rate_limit_visitors(visitors.len());
        evicted
    }

    /// Sweep idle clients every clean interval until shutdown.
    pub fn spawn_evictor(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(limiter.config.clean_interval());
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(
                interval_secs = limiter.config.clean_interval_secs,
                expiry_secs = limiter.config.clean_expiry_secs,
                "Rate limit evictor starting"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle(now());
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted idle rate limit visitors");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit evictor received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Middleware that admits or rejects each request.
    pub fn middleware(self: &Arc<Self>) -> Middleware {
        let limiter = Arc::clone(self);
        middleware_fn(move |ctx, next| {
            let limiter = Arc::clone(&limiter);
            Box::pin(async move {
                let Some(key) = limiter.client_key(ctx)? else {
                    tracing::error!(path = %ctx.path(), "Cannot rate limit request without a client address");
                    ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
                    return Ok(());
                };

                if limiter.allow(&key) {
                    return next.run(ctx).await;
                }

                tracing::warn!(client = %key, "Rate limit exceeded");
                metrics::record_rate_limited(key_mode(limiter.config.key));
                match &limiter.limit_handler {
                    Some(handler) => handler.call(ctx).await,
                    None => {
                        ctx.error(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
                        Ok(())
                    }
                }
            })
        })
    }

    /// Identity used as the bucket key, or `None` when no address is known.
    ///
    /// In cookie mode a missing identity cookie is minted, and the cookie is
    /// re-sent on every request so its lifetime tracks the clean expiry.
    fn client_key(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<String>, crate::http::error::HandlerError> {
        match self.config.key {
            RateLimitKey::Ip => Ok(ctx.ip().map(|ip| ip.to_string())),
            RateLimitKey::ProxyIp => Ok(proxy_ip(ctx).or_else(|| ctx.ip().map(|ip| ip.to_string()))),
            RateLimitKey::Cookie => {
                let id = match ctx.cookie(&self.config.cookie_name) {
                    Some(id) if !id.is_empty() => id.to_string(),
                    _ => uuid::Uuid::new_v4().to_string(),
                };
                let cookie = SetCookie::new(self.config.cookie_name.clone(), id.clone())
                    .max_age(self.config.clean_expiry())
                    .http_only(true);
                ctx.set_cookie(&cookie)?;
                Ok(Some(id))
            }
        }
    }
}

/// Current time from the tokio clock, so paused test time applies.
fn now() -> Instant {
    time::Instant::now().into_std()
}

/// Client address announced by a reverse proxy.
fn proxy_ip(ctx: &RequestContext) -> Option<String> {
    let forwarded = ctx
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || ctx.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty());

    forwarded.or_else(real_ip).map(strip_port)
}

fn strip_port(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(sock) => sock.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

fn key_mode(key: RateLimitKey) -> &'static str {
    match key {
        RateLimitKey::Ip => "ip",
        RateLimitKey::ProxyIp => "proxy_ip",
        RateLimitKey::Cookie => "cookie",
    }
}
