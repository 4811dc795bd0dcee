//! Cookie-keyed sessions.
//!
//! # Responsibilities
//! - Load the session named by the request cookie before the handler runs
//! - Commit changes after the handler, rewriting `Set-Cookie` on the buffer
//! - Mark responses with `Vary: Cookie`
//!
//! # Design Decisions
//! - Backends implement [`SessionStore`]; values are JSON
//! - A token is minted lazily, on the first modification
//! - Renewing or destroying a session removes the old token from the store
//! - A failing handler skips the commit and the error keeps propagating

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::http::cookie::{SameSite, SetCookie};
use crate::http::error::{HandlerError, SessionError};
use crate::http::handler::{middleware_fn, Middleware};
use crate::http::services::{Session, SessionStatus};

pub type SessionValues = HashMap<String, Value>;

/// Persistence for session values.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Values stored under `token`, or `None` if unknown or expired.
    async fn load(&self, token: &str) -> Result<Option<SessionValues>, SessionError>;

    async fn save(&self, token: &str, values: &SessionValues, ttl: Duration) -> Result<(), SessionError>;

    async fn remove(&self, token: &str) -> Result<(), SessionError>;
}

struct StoredSession {
    values: SessionValues,
    expires_at: Instant,
}

/// In-process session store.
///
/// Expired entries are dropped lazily on access, by
/// [`purge_expired`](Self::purge_expired), or periodically by the task from
/// [`spawn_purger`](Self::spawn_purger).
#[derive(Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, StoredSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries every `interval` until shutdown.
    pub fn spawn_purger(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;

            tracing::info!(interval_secs = interval.as_secs(), "Session purger starting");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = store.len(), "Purged expired sessions");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Session purger received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

/// Current time from the tokio clock, so paused test time applies.
fn now() -> Instant {
    time::Instant::now().into_std()
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token: &str) -> Result<Option<SessionValues>, SessionError> {
        let now = now();
        // The shard guard must be released before removing from the same map.
        let live = self
            .entries
            .get(token)
            .map(|entry| (entry.expires_at > now).then(|| entry.values.clone()));

        match live {
            Some(Some(values)) => Ok(Some(values)),
            Some(None) => {
                self.entries.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, token: &str, values: &SessionValues, ttl: Duration) -> Result<(), SessionError> {
        self.entries.insert(
            token.to_string(),
            StoredSession {
                values: values.clone(),
                expires_at: now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, token: &str) -> Result<(), SessionError> {
        self.entries.remove(token);
        Ok(())
    }
}

/// Session installed on the request context by [`sessions`].
#[derive(Debug, Default)]
pub struct SessionState {
    token: Option<String>,
    values: SessionValues,
    status: Option<SessionStatus>,
    renew: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(token: String, values: SessionValues) -> Self {
        Self {
            token: Some(token),
            values,
            ..Self::default()
        }
    }

    fn touch(&mut self) {
        self.status = Some(SessionStatus::Modified);
    }
}

impl Session for SessionState {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        if self.status == Some(SessionStatus::Destroyed) {
            // Writing after destroy starts over with a fresh token.
            self.renew = true;
        }
        self.values.insert(key.to_string(), value);
        self.touch();
    }

    fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn delete(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.touch();
        }
    }

    fn destroy(&mut self) {
        self.values.clear();
        self.status = Some(SessionStatus::Destroyed);
    }

    fn renew_token(&mut self) {
        self.renew = true;
        self.touch();
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn status(&self) -> SessionStatus {
        self.status.unwrap_or(SessionStatus::Unmodified)
    }

    fn renew_requested(&self) -> bool {
        self.renew
    }

    fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

/// Cookie and lifetime settings for [`sessions`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub lifetime: Duration,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            lifetime: Duration::from_secs(24 * 60 * 60),
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl SessionConfig {
    fn cookie(&self, token: &str) -> SetCookie {
        SetCookie::new(self.cookie_name.clone(), token)
            .max_age(self.lifetime)
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site)
    }

    fn expired_cookie(&self) -> SetCookie {
        SetCookie::expired(self.cookie_name.clone())
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site)
    }
}

/// Load and commit sessions around the rest of the chain.
pub fn sessions(store: Arc<dyn SessionStore>, config: SessionConfig) -> Middleware {
    let config = Arc::new(config);
    middleware_fn(move |ctx, next| {
        let store = Arc::clone(&store);
        let config = Arc::clone(&config);
        Box::pin(async move {
            let token = ctx.cookie(&config.cookie_name).map(str::to_string);
            let state = match token {
                Some(token) => match store.load(&token).await? {
                    Some(values) => SessionState::loaded(token, values),
                    None => SessionState::new(),
                },
                None => SessionState::new(),
            };
            ctx.session = Some(Box::new(state));

            next.run(ctx).await?;

            // Handlers may have taken the session out of the context.
            let Some(session) = ctx.session.take() else {
                return Ok(());
            };

            match session.status() {
                SessionStatus::Modified => {
                    let token = match session.token() {
                        Some(token) if !session.renew_requested() => token.to_string(),
                        previous => {
                            if let Some(previous) = previous {
                                store.remove(previous).await?;
                            }
                            Uuid::new_v4().to_string()
                        }
                    };
                    store.save(&token, session.values(), config.lifetime).await?;
                    ctx.set_cookie(&config.cookie(&token))?;
                    tracing::debug!(path = %ctx.path(), "Session committed");
                }
                SessionStatus::Destroyed => {
                    if let Some(token) = session.token() {
                        store.remove(token).await?;
                    }
                    ctx.set_cookie(&config.expired_cookie())?;
                    tracing::debug!(path = %ctx.path(), "Session destroyed");
                }
                SessionStatus::Unmodified => {}
            }

            ctx.append_header_token(header::VARY, "Cookie");
            Ok::<_, HandlerError>(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::RequestContext;
    use crate::http::cookie::find_cookie;
    use crate::http::error::HandlerError;
    use crate::http::handler::{handler_fn, wrap, BoxHandler};
    use crate::http::testing::{buffer, collect, context, request};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use serde_json::json;

    fn session_token(headers: &HeaderMap) -> Option<String> {
        let cookie = headers.get(header::SET_COOKIE)?.to_str().ok()?;
        let pair = cookie.split(';').next()?;
        find_cookie(pair, "session").map(str::to_string)
    }

    async fn run(
        chain: &BoxHandler,
        cookie: Option<&str>,
    ) -> (StatusCode, HeaderMap, String) {
        let mut req = request("GET", "/");
        if let Some(token) = cookie {
            let value = HeaderValue::try_from(format!("session={token}")).unwrap();
            req.headers_mut().insert(header::COOKIE, value);
        }
        let (buffer, rx) = buffer();
        let mut ctx = RequestContext::new(req, buffer);
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();
        collect(rx).await
    }

    fn counter() -> BoxHandler {
        handler_fn(|ctx| {
            Box::pin(async move {
                let session = ctx
                    .session
                    .as_mut()
                    .ok_or_else(|| HandlerError::status(StatusCode::INTERNAL_SERVER_ERROR, "no session"))?;
                let visits = session.get("visits").and_then(Value::as_u64).unwrap_or(0) + 1;
                session.set("visits", json!(visits));
                ctx.text(StatusCode::OK, &visits.to_string());
                Ok::<_, HandlerError>(())
            })
        })
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = Arc::new(MemorySessionStore::new());
        let chain = wrap(counter(), &[sessions(store.clone(), SessionConfig::default())]);

        let (_, headers, body) = run(&chain, None).await;
        assert_eq!(body, "1");
        assert_eq!(headers["vary"], "Cookie");
        let token = session_token(&headers).unwrap();
        assert_eq!(store.len(), 1);

        let (_, headers, body) = run(&chain, Some(&token)).await;
        assert_eq!(body, "2");
        assert_eq!(session_token(&headers).as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_unknown_token_starts_fresh() {
        let store = Arc::new(MemorySessionStore::new());
        let chain = wrap(counter(), &[sessions(store, SessionConfig::default())]);

        let (_, headers, body) = run(&chain, Some("forged")).await;
        assert_eq!(body, "1");
        assert_ne!(session_token(&headers).as_deref(), Some("forged"));
    }

    #[tokio::test]
    async fn test_destroy_expires_cookie_and_entry() {
        let store = Arc::new(MemorySessionStore::new());
        let mut values = SessionValues::new();
        values.insert("user_id".to_string(), json!(3));
        store.save("tok", &values, Duration::from_secs(60)).await.unwrap();

        let logout = handler_fn(|ctx| {
            Box::pin(async move {
                if let Some(session) = ctx.session.as_mut() {
                    session.destroy();
                }
                Ok(())
            })
        });
        let chain = wrap(logout, &[sessions(store.clone(), SessionConfig::default())]);

        let (_, headers, _) = run(&chain, Some("tok")).await;
        let cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("session=; Path=/; Max-Age=0"), "{cookie}");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_renew_replaces_token() {
        let store = Arc::new(MemorySessionStore::new());
        store.save("old", &SessionValues::new(), Duration::from_secs(60)).await.unwrap();

        let login = handler_fn(|ctx| {
            Box::pin(async move {
                if let Some(session) = ctx.session.as_mut() {
                    session.renew_token();
                    session.set("user_id", json!(11));
                }
                Ok(())
            })
        });
        let chain = wrap(login, &[sessions(store.clone(), SessionConfig::default())]);

        let (_, headers, _) = run(&chain, Some("old")).await;
        let token = session_token(&headers).unwrap();
        assert_ne!(token, "old");
        assert!(store.load("old").await.unwrap().is_none());
        assert_eq!(store.load(&token).await.unwrap().unwrap()["user_id"], json!(11));
    }

    #[tokio::test]
    async fn test_failed_handler_skips_commit() {
        let store = Arc::new(MemorySessionStore::new());
        let failing = handler_fn(|ctx| {
            Box::pin(async move {
                if let Some(session) = ctx.session.as_mut() {
                    session.set("draft", json!("x"));
                }
                Err(HandlerError::status(StatusCode::CONFLICT, "conflict"))
            })
        });
        let chain = wrap(failing, &[sessions(store.clone(), SessionConfig::default())]);

        let (mut ctx, _rx) = context("GET", "/");
        assert!(chain.call(&mut ctx).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_loaded() {
        let store = MemorySessionStore::new();
        store.save("stale", &SessionValues::new(), Duration::ZERO).await.unwrap();
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(store.is_empty());

        store.save("a", &SessionValues::new(), Duration::ZERO).await.unwrap();
        store.save("b", &SessionValues::new(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purger_drops_abandoned_sessions_and_stops_on_shutdown() {
        let store = Arc::new(MemorySessionStore::new());
        store.save("abandoned", &SessionValues::new(), Duration::from_secs(1)).await.unwrap();
        store.save("active", &SessionValues::new(), Duration::from_secs(3600)).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let task = store.spawn_purger(Duration::from_secs(1), rx);

        time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.len(), 1);
        assert!(store.load("active").await.unwrap().is_some());

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
