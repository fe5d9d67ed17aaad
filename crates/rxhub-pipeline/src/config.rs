//! Pipeline configuration

use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default number of catalog records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Default consumer group for the chunker.
pub const DEFAULT_CHUNKER_GROUP: &str = "chunker-workers";

/// Default consumer group for the chunk worker pool.
pub const DEFAULT_UPSERT_GROUP: &str = "upsert-workers";

/// Default worker pool floor.
pub const DEFAULT_MIN_WORKERS: usize = 2;

/// Default worker pool ceiling.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default interval between backlog evaluations, in seconds.
pub const DEFAULT_SCALE_CHECK_INTERVAL_SECS: u64 = 30;

/// Default backlog high-water mark: add a worker above this.
pub const DEFAULT_SCALE_UP_BACKLOG: u64 = 10_000;

/// Default backlog low-water mark: remove a worker below this.
pub const DEFAULT_SCALE_DOWN_BACKLOG: u64 = 1_000;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub workers: WorkerPoolConfig,
}

/// Chunker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Records per chunk; the last chunk of a batch may be smaller.
    pub chunk_size: usize,
    /// Consumer group the chunker joins on the batch-received topic.
    pub consumer_group: String,
}

/// Worker pool / orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Consumer group the chunk workers share on the chunk-ready topic.
    pub consumer_group: String,
    /// Pool floor: the orchestrator never scales below this.
    pub min_workers: usize,
    /// Pool ceiling: the orchestrator never scales above this.
    pub max_workers: usize,
    /// Seconds between backlog evaluations.
    pub scale_check_interval_secs: u64,
    /// Add a worker when the backlog exceeds this.
    pub scale_up_backlog: u64,
    /// Remove a worker when the backlog drops below this.
    pub scale_down_backlog: u64,
}

impl PipelineConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = PipelineConfig {
            chunking: ChunkingConfig {
                chunk_size: env_parsed("CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                consumer_group: std::env::var("CHUNKER_GROUP")
                    .unwrap_or_else(|_| DEFAULT_CHUNKER_GROUP.to_string()),
            },
            workers: WorkerPoolConfig {
                consumer_group: std::env::var("UPSERT_GROUP")
                    .unwrap_or_else(|_| DEFAULT_UPSERT_GROUP.to_string()),
                min_workers: env_parsed("MIN_UPSERT_WORKERS", DEFAULT_MIN_WORKERS),
                max_workers: env_parsed("MAX_UPSERT_WORKERS", DEFAULT_MAX_WORKERS),
                scale_check_interval_secs: env_parsed(
                    "SCALE_CHECK_INTERVAL",
                    DEFAULT_SCALE_CHECK_INTERVAL_SECS,
                ),
                scale_up_backlog: env_parsed("SCALE_UP_BACKLOG", DEFAULT_SCALE_UP_BACKLOG),
                scale_down_backlog: env_parsed("SCALE_DOWN_BACKLOG", DEFAULT_SCALE_DOWN_BACKLOG),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.workers.min_workers == 0 {
            anyhow::bail!("Worker pool floor must be greater than 0");
        }

        if self.workers.min_workers > self.workers.max_workers {
            anyhow::bail!(
                "Worker pool floor ({}) cannot be greater than ceiling ({})",
                self.workers.min_workers,
                self.workers.max_workers
            );
        }

        if self.workers.scale_down_backlog >= self.workers.scale_up_backlog {
            anyhow::bail!(
                "Scale-down backlog ({}) must be below scale-up backlog ({})",
                self.workers.scale_down_backlog,
                self.workers.scale_up_backlog
            );
        }

        if self.workers.scale_check_interval_secs == 0 {
            anyhow::bail!("Scale check interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig {
                chunk_size: DEFAULT_CHUNK_SIZE,
                consumer_group: DEFAULT_CHUNKER_GROUP.to_string(),
            },
            workers: WorkerPoolConfig {
                consumer_group: DEFAULT_UPSERT_GROUP.to_string(),
                min_workers: DEFAULT_MIN_WORKERS,
                max_workers: DEFAULT_MAX_WORKERS,
                scale_check_interval_secs: DEFAULT_SCALE_CHECK_INTERVAL_SECS,
                scale_up_backlog: DEFAULT_SCALE_UP_BACKLOG,
                scale_down_backlog: DEFAULT_SCALE_DOWN_BACKLOG,
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1_000);
        assert_eq!(config.workers.min_workers, 2);
        assert_eq!(config.workers.max_workers, 8);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_floor_above_ceiling() {
        let mut config = PipelineConfig::default();
        config.workers.min_workers = 10;
        config.workers.max_workers = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let mut config = PipelineConfig::default();
        config.workers.scale_down_backlog = 20_000;
        assert!(config.validate().is_err());
    }
}
