//! Common test utilities shared by the integration tests

#![allow(dead_code)]

pub mod fake_grid;

use gridlink::network::{ConnectionPool, PoolConfig, ServerAddress, ServerSelection};
use gridlink::ops::{Executor, ExecutorConfig};
use gridlink::stats::StatsRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use fake_grid::{Behavior, FakeGrid};

/// Deterministic pool settings: servers tried in configured order
pub fn test_pool_config() -> PoolConfig {
    PoolConfig {
        max_connections_per_server: 4,
        acquire_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_millis(500),
        selection: ServerSelection::InOrder,
        ..PoolConfig::default()
    }
}

pub fn test_executor_config() -> ExecutorConfig {
    ExecutorConfig {
        max_attempts: 3,
        per_attempt_timeout: Duration::from_millis(200),
    }
}

pub fn addresses(servers: &[&str]) -> Vec<ServerAddress> {
    servers.iter().map(|server| ServerAddress::from(*server)).collect()
}

pub fn executor_for(grid: &FakeGrid, servers: &[&str], config: ExecutorConfig) -> Executor {
    executor_with_pool(grid, servers, test_pool_config(), config)
}

pub fn executor_with_pool(
    grid: &FakeGrid,
    servers: &[&str],
    pool_config: PoolConfig,
    config: ExecutorConfig,
) -> Executor {
    let pool = ConnectionPool::new(addresses(servers), Arc::new(grid.clone()), pool_config);
    Executor::new(pool, Arc::new(StatsRegistry::new()), config)
}
