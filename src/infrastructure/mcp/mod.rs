//! Query executor access over the Model Context Protocol.
//!
//! One session per pipeline run: [`QueryExecutorConnector::connect`] opens it,
//! [`ScopedConnection`] guarantees it is closed.

pub mod client;
pub mod protocol;

use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{Row, SchemaDescription};
use async_trait::async_trait;
use tracing::warn;

pub use client::{McpConnector, McpSettings};

#[async_trait]
pub trait QueryExecutor: Send {
    async fn read_schema(&mut self) -> Result<SchemaDescription>;
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>>;
    /// Idempotent. Never fails; problems are logged.
    async fn close(&mut self);
}

#[async_trait]
pub trait QueryExecutorConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueryExecutor>>;
}

/// Owns a connection until [`ScopedConnection::release`]. If the owner is
/// dropped first (the caller abandoned the request), the close is spawned on
/// the current runtime.
pub struct ScopedConnection {
    inner: Option<Box<dyn QueryExecutor>>,
}

impl ScopedConnection {
    pub fn new(executor: Box<dyn QueryExecutor>) -> Self {
        Self {
            inner: Some(executor),
        }
    }

    pub fn executor(&mut self) -> Result<&mut (dyn QueryExecutor + 'static)> {
        self.inner
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal("Connection already released".to_string()))
    }

    pub async fn release(mut self) {
        if let Some(mut executor) = self.inner.take() {
            executor.close().await;
        }
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let Some(mut executor) = self.inner.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Connection dropped before release, closing in the background");
                handle.spawn(async move {
                    executor.close().await;
                });
            }
            Err(_) => warn!("Connection dropped outside a runtime, remote session not closed"),
        }
    }
}
