//! Capability handles carried by a request context.
//!
//! Logger, templates, session and user are optional collaborators. They are
//! installed when the context is constructed (router-wide logger and
//! templates) or by middleware (session, user), and are always reached
//! through these traits.

use std::collections::HashMap;
use std::fmt;
use std::io;

use serde_json::Value;

use super::error::HandlerError;

/// Severity for [`Logger`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

/// Request-scoped logging sink.
///
/// Formatted variants take `format_args!` so callers keep lazy formatting.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>);

    fn critical(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Critical, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warning(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warning, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

/// Logger that forwards to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        match level {
            LogLevel::Critical => tracing::error!(critical = true, "{}", args),
            LogLevel::Error => tracing::error!("{}", args),
            LogLevel::Warning => tracing::warn!("{}", args),
            LogLevel::Info => tracing::info!("{}", args),
            LogLevel::Debug => tracing::debug!("{}", args),
        }
    }
}

/// Logger that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// What happened to a session during the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unmodified,
    Modified,
    Destroyed,
}

/// Per-request view of a user session.
pub trait Session: Send + Sync {
    fn get(&self, key: &str) -> Option<&Value>;
    fn set(&mut self, key: &str, value: Value);
    fn exists(&self, key: &str) -> bool;
    fn delete(&mut self, key: &str);

    /// Drop all values and expire the session cookie on commit.
    fn destroy(&mut self);

    /// Issue a fresh token on commit, keeping the values.
    fn renew_token(&mut self);

    fn token(&self) -> Option<&str>;
    fn status(&self) -> SessionStatus;
    fn renew_requested(&self) -> bool;
    fn values(&self) -> &HashMap<String, Value>;
}

/// Looks up templates by name and renders them into a byte sink.
pub trait TemplateResolver: Send + Sync {
    fn render(&self, name: &str, data: &Value, out: &mut dyn io::Write) -> Result<(), HandlerError>;
}

/// The authenticated principal, if any.
pub trait User: Send + Sync {
    fn is_authenticated(&self) -> bool;

    fn is_admin(&self) -> bool {
        false
    }

    fn has_permissions(&self, _permissions: &[&str]) -> bool {
        self.is_admin()
    }
}
