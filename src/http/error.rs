//! Error types for the request pipeline.

use axum::http::StatusCode;
use thiserror::Error;

use crate::routing::{PatternError, RouteError};

/// Failure returned by a handler or middleware.
///
/// Handlers return this instead of panicking; a recoverer middleware turns it
/// into an error response.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler wants a specific error status to be rendered.
    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String },

    /// A panic caught while running the chain.
    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }

    /// Status a recoverer should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised by a session backend.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Store(String),

    #[error("session value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised by a [`ResponseSink`](super::buffer::ResponseSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("operation not supported by the response sink")]
    Unsupported,

    #[error("connection already hijacked")]
    AlreadyHijacked,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure escaping [`Router::dispatch`](crate::routing::Router::dispatch).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Nothing in the chain recovered from a handler failure.
    #[error("unhandled handler failure: {0}")]
    Handler(#[from] HandlerError),

    #[error("failed to flush response: {0}")]
    Sink(#[from] SinkError),
}
