//! Configuration types.

use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened up front by `warm()`.
    pub min_connections: usize,
    /// Ceiling on total connections (idle + in use).
    pub max_connections: usize,
    /// How long an `acquire()` may wait for a connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the executor consults the cache at all.
    pub enabled: bool,
    /// Lifetime applied to entries inserted without an explicit TTL.
    pub default_ttl: Duration,
    /// Entry ceiling; inserting past it evicts the least-recently-used entry.
    pub max_size: usize,
    /// Interval of the background sweep that purges expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300), // 5 minutes
            max_size: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// File manager configuration.
#[derive(Debug, Clone)]
pub struct FileManagerConfig {
    /// Maximum concurrent read operations.
    pub read_concurrency: usize,
    /// Maximum concurrent write operations.
    pub write_concurrency: usize,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            read_concurrency: 8,
            write_concurrency: 4,
        }
    }
}

/// Execution history ring configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Number of records retained before the oldest are overwritten.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum tasks simultaneously holding a connection.
    pub concurrency_limit: usize,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub files: FileManagerConfig,
    pub history: HistoryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            files: FileManagerConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ExecutorConfig::default();
        assert_eq!(config.concurrency_limit, 4);
        assert!(config.pool.min_connections <= config.pool.max_connections);
        assert!(config.cache.enabled);
        assert_eq!(config.history.capacity, 256);
    }
}
