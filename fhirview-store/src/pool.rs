//! Connection pool for the document store.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::connection::StoreConnection;
use crate::error::{StoreError, StoreResult};

/// Pool sizing and per-query deadline defaults.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Minimum number of connections kept alive.
    pub min_connections: usize,
    /// Maximum number of connections.
    pub max_connections: usize,
    /// Maximum time to wait for a connection.
    pub wait_timeout: Option<Duration>,
    /// Default per-query deadline; overridable per call.
    pub command_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 20,
            wait_timeout: Some(Duration::from_secs(30)),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// A connection pool over the document store.
#[derive(Clone)]
pub struct StorePool {
    inner: Pool,
    config: Arc<StoreConfig>,
    options: Arc<PoolOptions>,
}

impl StorePool {
    /// Create a pool from configuration with default options.
    pub fn connect(config: StoreConfig) -> StoreResult<Self> {
        Self::connect_with(config, PoolOptions::default())
    }

    /// Create a pool with explicit options.
    pub fn connect_with(config: StoreConfig, options: PoolOptions) -> StoreResult<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.to_pg_config(), NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .runtime(Runtime::Tokio1)
            .max_size(options.max_connections)
            .wait_timeout(options.wait_timeout)
            .create_timeout(Some(config.connect_timeout()))
            .build()
            .map_err(|e| StoreError::config(format!("failed to create pool: {e}")))?;

        info!(
            host = %config.host(),
            port = %config.port(),
            database = %config.database(),
            min_connections = options.min_connections,
            max_connections = options.max_connections,
            "document store connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
            options: Arc::new(options),
        })
    }

    /// Acquire a connection.
    pub async fn get(&self) -> StoreResult<StoreConnection> {
        debug!("acquiring connection from pool");
        let client = self.inner.get().await?;
        Ok(StoreConnection::new(client, self.options.command_timeout))
    }

    /// Current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available as usize,
            size: status.size as usize,
            max_size: status.max_size as usize,
            waiting: status.waiting,
        }
    }

    /// The pool's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Probe health by running `SELECT 1` on a fresh connection.
    pub async fn is_healthy(&self) -> bool {
        match self.get().await {
            Ok(conn) => conn.query_one("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Close the pool and all connections.
    pub fn close(&self) {
        self.inner.close();
        info!("document store connection pool closed");
    }
}

/// Point-in-time pool status.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Idle connections.
    pub available: usize,
    /// Current total size.
    pub size: usize,
    /// Maximum size.
    pub max_size: usize,
    /// Tasks waiting for a connection.
    pub waiting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.min_connections, 5);
        assert_eq!(options.max_connections, 20);
        assert_eq!(options.command_timeout, Duration::from_secs(30));
    }
}
