// rust/seqview-core/src/config.rs

//! Configuration for caches, batching and the prefetch engine.
//!
//! Values are read from TOML, can be overridden with `SEQV_*` environment
//! variables, and are validated before any view or engine is built from them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SeqError};

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeqConfig {
    pub cache: CacheConfig,
    pub prefetch: PrefetchConfig,
    pub batch: BatchConfig,
}

/// How prefetch workers are isolated from the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Worker threads sharing the consumer's memory.
    #[default]
    Threads,
    /// Forked worker processes returning items through shared memory.
    Processes,
}

impl FromStr for ExecutionMode {
    type Err = SeqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "threads" | "thread" => Ok(Self::Threads),
            "processes" | "process" => Ok(Self::Processes),
            other => Err(SeqError::config(format!(
                "execution_mode must be 'threads' or 'processes', got '{other}'"
            ))),
        }
    }
}

/// Cache configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub cache_size: usize,
}

/// Prefetch engine configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Number of background workers; 0 evaluates on the consumer's thread.
    pub worker_count: usize,
    /// Items that may be computed ahead of the consumer.
    pub max_buffered: usize,
    /// Threads or processes.
    pub execution_mode: ExecutionMode,
    // Capacity in bytes of one shared segment (process mode only).
    pub segment_size: usize,
    /// Directory backing the shared mapping, e.g. `/dev/shm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_dir: Option<PathBuf>,
}

// Batch / unbatch configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    // Drop a trailing partial batch instead of emitting it.
    pub drop_last: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { cache_size: 64 }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_buffered: 10,
            execution_mode: ExecutionMode::Threads,
            segment_size: 1024 * 1024, // 1 MB
            segment_dir: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            drop_last: false,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(SeqError::config("cache.cache_size must be greater than 0"));
        }
        Ok(())
    }
}

impl PrefetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_buffered == 0 {
            return Err(SeqError::config(
                "prefetch.max_buffered must be greater than 0",
            ));
        }
        if self.segment_size == 0 {
            return Err(SeqError::config(
                "prefetch.segment_size must be greater than 0",
            ));
        }
        if let Some(dir) = &self.segment_dir {
            if !dir.is_dir() {
                return Err(SeqError::config(format!(
                    "prefetch.segment_dir '{}' is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SeqError::config("batch.batch_size must be greater than 0"));
        }
        Ok(())
    }
}

impl FromStr for SeqConfig {
    type Err = SeqError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| SeqError::config_with_source("failed to parse TOML config", e))
    }
}

impl SeqConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SeqError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `SEQV_`, for example:
    // - `SEQV_CACHE_SIZE` overrides `cache.cache_size`
    // - `SEQV_PREFETCH_WORKER_COUNT` overrides `prefetch.worker_count`
    // - `SEQV_PREFETCH_EXECUTION_MODE` overrides `prefetch.execution_mode`
    // - `SEQV_BATCH_DROP_LAST` overrides `batch.drop_last`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SEQV_CACHE_SIZE") {
            if let Ok(v) = val.parse() {
                self.cache.cache_size = v;
            }
        }

        if let Ok(val) = std::env::var("SEQV_PREFETCH_WORKER_COUNT") {
            if let Ok(v) = val.parse() {
                self.prefetch.worker_count = v;
            }
        }
        if let Ok(val) = std::env::var("SEQV_PREFETCH_MAX_BUFFERED") {
            if let Ok(v) = val.parse() {
                self.prefetch.max_buffered = v;
            }
        }
        if let Ok(val) = std::env::var("SEQV_PREFETCH_EXECUTION_MODE") {
            if let Ok(v) = val.parse() {
                self.prefetch.execution_mode = v;
            }
        }
        if let Ok(val) = std::env::var("SEQV_PREFETCH_SEGMENT_SIZE") {
            if let Ok(v) = val.parse() {
                self.prefetch.segment_size = v;
            }
        }
        if let Ok(val) = std::env::var("SEQV_PREFETCH_SEGMENT_DIR") {
            self.prefetch.segment_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("SEQV_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.batch.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("SEQV_BATCH_DROP_LAST") {
            if let Ok(v) = val.parse() {
                self.batch.drop_last = v;
            }
        }

        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.prefetch.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SeqConfig::default();

        assert_eq!(config.cache.cache_size, 64);
        assert_eq!(config.prefetch.worker_count, 4);
        assert_eq!(config.prefetch.max_buffered, 10);
        assert_eq!(config.prefetch.execution_mode, ExecutionMode::Threads);
        assert_eq!(config.prefetch.segment_size, 1024 * 1024);
        assert!(config.prefetch.segment_dir.is_none());
        assert_eq!(config.batch.batch_size, 32);
        assert!(!config.batch.drop_last);
    }

    #[test]
    fn test_default_validates() {
        assert!(SeqConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: SeqConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [cache]
            cache_size = 8

            [prefetch]
            worker_count = 2
            max_buffered = 40
            execution_mode = "processes"
            segment_size = 4096

            [batch]
            batch_size = 16
            drop_last = true
        "#;
        let config: SeqConfig = toml.parse().unwrap();

        assert_eq!(config.cache.cache_size, 8);
        assert_eq!(config.prefetch.worker_count, 2);
        assert_eq!(config.prefetch.max_buffered, 40);
        assert_eq!(config.prefetch.execution_mode, ExecutionMode::Processes);
        assert_eq!(config.prefetch.segment_size, 4096);
        assert_eq!(config.batch.batch_size, 16);
        assert!(config.batch.drop_last);
    }

    #[test]
    fn test_from_str_partial_keeps_defaults() {
        let config: SeqConfig = "[prefetch]\nworker_count = 0\n".parse().unwrap();
        assert_eq!(config.prefetch.worker_count, 0);
        assert_eq!(config.prefetch.max_buffered, 10);
        assert_eq!(config.cache.cache_size, 64);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<SeqConfig, _> = "cache = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_str_unknown_mode() {
        let result: std::result::Result<SeqConfig, _> =
            "[prefetch]\nexecution_mode = \"fibers\"\n".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\ncache_size = 3").unwrap();

        let config = SeqConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache.cache_size, 3);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[prefetch]\nmax_buffered = 0").unwrap();

        let err = SeqConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_buffered"));
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(SeqConfig::from_file("/nonexistent/seqview.toml").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = SeqConfig::default();
        config.cache.cache_size = 0;
        assert!(config.validate().is_err());

        let mut config = SeqConfig::default();
        config.prefetch.segment_size = 0;
        assert!(config.validate().is_err());

        let mut config = SeqConfig::default();
        config.batch.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_workers_is_synchronous_not_invalid() {
        let mut config = SeqConfig::default();
        config.prefetch.worker_count = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_segment_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SeqConfig::default();
        config.prefetch.segment_dir = Some(dir.path().to_path_buf());
        assert!(config.validate().is_ok());

        config.prefetch.segment_dir = Some(dir.path().join("missing"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_execution_mode_from_str() {
        assert_eq!("threads".parse::<ExecutionMode>().unwrap(), ExecutionMode::Threads);
        assert_eq!("Process".parse::<ExecutionMode>().unwrap(), ExecutionMode::Processes);
        assert!("gpu".parse::<ExecutionMode>().is_err());
    }

    fn clear_seqv_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("SEQV_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variables are process-global, so all override cases live
    // in one test.
    #[test]
    fn test_env_overrides() {
        clear_seqv_env_vars();

        std::env::set_var("SEQV_CACHE_SIZE", "5");
        std::env::set_var("SEQV_PREFETCH_WORKER_COUNT", "0");
        std::env::set_var("SEQV_PREFETCH_EXECUTION_MODE", "processes");
        std::env::set_var("SEQV_BATCH_DROP_LAST", "true");

        let config = SeqConfig::default().with_env_overrides();
        assert_eq!(config.cache.cache_size, 5);
        assert_eq!(config.prefetch.worker_count, 0);
        assert_eq!(config.prefetch.execution_mode, ExecutionMode::Processes);
        assert!(config.batch.drop_last);

        clear_seqv_env_vars();

        std::env::set_var("SEQV_PREFETCH_MAX_BUFFERED", "many");
        let config = SeqConfig::default().with_env_overrides();
        assert_eq!(config.prefetch.max_buffered, 10);

        clear_seqv_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = SeqConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: SeqConfig = toml_str.parse().unwrap();

        assert_eq!(original.cache.cache_size, parsed.cache.cache_size);
        assert_eq!(original.prefetch.max_buffered, parsed.prefetch.max_buffered);
        assert_eq!(original.prefetch.execution_mode, parsed.prefetch.execution_mode);
    }
}
