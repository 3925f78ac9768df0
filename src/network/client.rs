use crate::config::ClientConfig;
use crate::network::pool::{ConnectionPool, PoolConfig, PoolStatus};
use crate::network::transport::{ServerAddress, TcpTransport, Transport};
use crate::ops::{
    CancelHandle, ExecuteError, Executor, ExecutorConfig, GetOp, Operation, PingOp, PutOp,
    RemoveOp, SizeOp,
};
use crate::security::TokenSupplier;
use crate::stats::{StatsRegistry, StatsSnapshot};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// High-level client for a set of grid servers.
///
/// Owns one connection pool, one stats registry and one executor; every
/// call goes through the executor's failover loop.
pub struct GridClient {
    executor: Executor,
    pruner: Option<JoinHandle<()>>,
}

impl GridClient {
    /// Build a TCP client from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate().context("Invalid client configuration")?;
        let servers = config.server_addresses()?;
        if servers.is_empty() {
            anyhow::bail!("No grid servers configured");
        }
        Ok(Self::with_transport(
            servers,
            Arc::new(TcpTransport),
            config.pool_config(),
            config.executor_config(),
        ))
    }

    pub fn with_transport(
        servers: Vec<ServerAddress>,
        transport: Arc<dyn Transport>,
        pool_config: PoolConfig,
        executor_config: ExecutorConfig,
    ) -> Self {
        let pool = ConnectionPool::new(servers, transport, pool_config);
        let stats = Arc::new(StatsRegistry::new());
        Self {
            executor: Executor::new(pool, stats, executor_config),
            pruner: None,
        }
    }

    pub fn with_token_supplier(mut self, supplier: Arc<dyn TokenSupplier>) -> Self {
        self.executor.set_token_supplier(supplier);
        self
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run any operation through the failover loop
    pub async fn execute<O: Operation>(&self, op: &O) -> Result<O::Output, ExecuteError> {
        self.executor.execute(op).await
    }

    pub async fn execute_with_cancel<O: Operation>(
        &self,
        op: &O,
        cancel: &CancelHandle,
    ) -> Result<O::Output, ExecuteError> {
        self.executor.execute_with_cancel(op, cancel).await
    }

    pub async fn ping(&self) -> Result<(), ExecuteError> {
        self.execute(&PingOp).await
    }

    pub async fn size(&self, region: &str) -> Result<u32, ExecuteError> {
        self.execute(&SizeOp::new(region)).await
    }

    pub async fn get(&self, region: &str, key: &str) -> Result<Option<Vec<u8>>, ExecuteError> {
        self.execute(&GetOp::new(region, key)).await
    }

    pub async fn put(&self, region: &str, key: &str, value: impl Into<Vec<u8>>) -> Result<(), ExecuteError> {
        self.execute(&PutOp::new(region, key, value)).await
    }

    pub async fn remove(&self, region: &str, key: &str) -> Result<bool, ExecuteError> {
        self.execute(&RemoveOp::new(region, key)).await
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.executor.stats().snapshots()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.executor.pool().status()
    }

    /// Periodically close connections idle for longer than `max_idle`.
    ///
    /// Must be called from within a tokio runtime. Replaces any pruner
    /// already running; the task stops when the client is dropped.
    pub fn start_idle_pruner(&mut self, max_idle: Duration) {
        if let Some(previous) = self.pruner.take() {
            previous.abort();
        }

        let pool = self.executor.pool().clone();
        let period = (max_idle / 2).max(Duration::from_millis(10));
        info!("Pruning connections idle for more than {:?}", max_idle);
        self.pruner = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = pool.prune_idle(max_idle);
                if pruned > 0 {
                    debug!("Pruned {} idle connections", pruned);
                }
            }
        }));
    }

    /// Close idle connections and stop the pruner
    pub fn shutdown(&mut self) {
        if let Some(pruner) = self.pruner.take() {
            pruner.abort();
        }
        let closed = self.executor.pool().close_idle();
        debug!("Closed {} idle connections on shutdown", closed);
    }
}

impl Drop for GridClient {
    fn drop(&mut self) {
        if let Some(pruner) = self.pruner.take() {
            pruner.abort();
        }
    }
}
