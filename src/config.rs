use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runtime settings for a [`Pipeline`](crate::Pipeline)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of pool worker threads
    pub workers: usize,
    /// Prefix for worker and dispatch thread names
    pub thread_name: String,
    /// How long a stalled transformer parks between output checks once its
    /// spin backoff is used up
    pub stall_park_micros: u64,
    /// How long a multi-input transformer waits on one empty slot before
    /// scanning every slot again
    pub join_rescan_micros: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            thread_name: "etl".to_string(),
            stall_park_micros: 100,
            join_rescan_micros: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| PipelineError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::ConfigError(
                "workers must be at least 1".into(),
            ));
        }
        if self.thread_name.trim().is_empty() || self.thread_name.contains('\0') {
            return Err(PipelineError::ConfigError(
                "thread_name must be non-empty and free of NUL bytes".into(),
            ));
        }
        if self.join_rescan_micros == 0 {
            return Err(PipelineError::ConfigError(
                "join_rescan_micros must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn stall_park(&self) -> Duration {
        Duration::from_micros(self.stall_park_micros)
    }

    pub fn join_rescan(&self) -> Duration {
        Duration::from_micros(self.join_rescan_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str("workers = 3").unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "etl");
        assert_eq!(config.stall_park(), Duration::from_micros(100));
        assert_eq!(config.join_rescan(), Duration::from_millis(1));
    }

    #[test]
    fn test_invalid_workers() {
        let result = PipelineConfig::from_toml_str("workers = 0");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_thread_name() {
        let result = PipelineConfig::from_toml_str("thread_name = \"etl\\u0000\"");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
        let result = PipelineConfig::from_toml_str("join_rescan_micros = 0");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = PipelineConfig::from_toml_str("workers = \"many\"");
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = 2\nthread_name = \"reports\"").unwrap();
        let config = PipelineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.thread_name, "reports");
    }
}
