//! Connection pool for NNTP posting sessions using deadpool
//!
//! Every worker checks out one connection and keeps it for as long as it
//! stays healthy. A connection that saw a transport or framing error is
//! discarded instead of being returned, and the next checkout dials a fresh
//! session.

use super::connection::{NntpConnection, PostReceipt};
use crate::config::UsenetConfig;
use crate::error::{ConfigError, NntpError, UlNzbError};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_native_tls::TlsConnector;

/// Connection manager for deadpool
pub struct NntpConnectionManager {
    config: Arc<UsenetConfig>,
    tls_connector: Option<Arc<TlsConnector>>,
}

impl NntpConnectionManager {
    pub fn new(config: UsenetConfig) -> Result<Self, UlNzbError> {
        let tls_connector = if config.ssl {
            Some(NntpConnection::tls_connector(&config)?)
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            tls_connector,
        })
    }
}

impl Manager for NntpConnectionManager {
    type Type = NntpConnection;
    type Error = UlNzbError;

    async fn create(&self) -> Result<NntpConnection, UlNzbError> {
        NntpConnection::connect(&self.config, self.tls_connector.clone())
            .await
            .inspect_err(|e| tracing::warn!("Failed to create NNTP connection: {}", e))
    }

    async fn recycle(
        &self,
        conn: &mut NntpConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<UlNzbError> {
        if conn.is_broken() {
            Err(RecycleError::Backend(NntpError::UnhealthyConnection.into()))
        } else {
            Ok(())
        }
    }
}

/// NNTP connection pool
pub type NntpPool = Pool<NntpConnectionManager>;

/// Pooled NNTP connection with convenience methods
pub struct PooledConnection {
    conn: Object<NntpConnectionManager>,
}

impl PooledConnection {
    pub async fn post(&mut self, article: &[u8]) -> Result<PostReceipt, UlNzbError> {
        self.conn.post(article).await
    }

    pub async fn stat(&mut self, message_id: &str) -> Result<bool, UlNzbError> {
        self.conn.stat(message_id).await
    }

    pub fn is_broken(&self) -> bool {
        self.conn.is_broken()
    }

    /// Remove the connection from the pool without sending QUIT
    pub fn discard(self) {
        drop(Object::take(self.conn));
    }

    /// Remove the connection from the pool and close it politely
    pub async fn finish(self) {
        let mut conn = Object::take(self.conn);
        conn.finish().await;
    }
}

/// Builder for creating connection pools with configuration
pub struct NntpPoolBuilder {
    config: UsenetConfig,
    max_size: usize,
    timeouts: deadpool::managed::Timeouts,
}

impl NntpPoolBuilder {
    pub fn new(config: UsenetConfig) -> Self {
        // Connect plus TLS plus greeting and auth round-trips
        let create = Duration::from_secs(config.timeout.saturating_mul(2).max(1));
        Self {
            max_size: config.connections as usize,
            config,
            timeouts: deadpool::managed::Timeouts {
                wait: None,
                create: Some(create),
                recycle: Some(Duration::from_secs(5)),
            },
        }
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn timeouts(mut self, timeouts: deadpool::managed::Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<NntpPool, UlNzbError> {
        let manager = NntpConnectionManager::new(self.config)?;
        Pool::builder(manager)
            .max_size(self.max_size)
            .runtime(deadpool::Runtime::Tokio1)
            .timeouts(self.timeouts)
            .build()
            .map_err(|e| {
                ConfigError::Invalid {
                    field: "connections".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

/// Extension trait for the pool to provide convenient methods
#[async_trait]
pub trait NntpPoolExt {
    /// Check out a connection, dialing a new one if none is idle
    async fn get_connection(&self) -> Result<PooledConnection, UlNzbError>;
}

#[async_trait]
impl NntpPoolExt for NntpPool {
    async fn get_connection(&self) -> Result<PooledConnection, UlNzbError> {
        let conn = self.get().await.map_err(|e| match e {
            PoolError::Backend(e) => e,
            PoolError::Timeout(_) => NntpError::Timeout {
                seconds: self
                    .timeouts()
                    .create
                    .map(|d| d.as_secs())
                    .unwrap_or_default(),
            }
            .into(),
            other => NntpError::ProtocolError(format!("Connection pool: {}", other)).into(),
        })?;
        Ok(PooledConnection { conn })
    }
}
