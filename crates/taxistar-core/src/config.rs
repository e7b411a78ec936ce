use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dimensions::DistanceKeyMode;
use crate::sources::SourceCatalog;
use crate::storage::ParquetCodec;

pub const DATA_ROOT_ENV: &str = "TAXISTAR_DATA_ROOT";
pub const REGISTRY_ENV: &str = "TAXISTAR_REGISTRY";
pub const LOG_DIR_ENV: &str = "TAXISTAR_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub registry_path: PathBuf,
    pub log_dir: PathBuf,
    pub sources: SourceCatalog,
    /// When set, trip distances are rounded to this many decimals before they
    /// are keyed into the distance dimension.
    pub distance_decimals: Option<u32>,
    pub parquet_compression: ParquetCodec,
    pub fail_on_missing_keys: bool,
    /// Upper bound on a single source download, body included. Unset means no limit.
    pub download_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            registry_path: PathBuf::from("data/stored_files.json"),
            log_dir: PathBuf::from("logs"),
            sources: SourceCatalog::default(),
            distance_decimals: None,
            parquet_compression: ParquetCodec::default(),
            fail_on_missing_keys: false,
            download_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str::<PipelineConfig>(toml_str).context("failed to parse pipeline config TOML")
    }

    /// Reads the TOML file at `path` when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::parse(&contents)?
            }
            None => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(DATA_ROOT_ENV) {
            self.data_root = PathBuf::from(root);
        }
        if let Some(registry) = lookup(REGISTRY_ENV) {
            self.registry_path = PathBuf::from(registry);
        }
        if let Some(log_dir) = lookup(LOG_DIR_ENV) {
            self.log_dir = PathBuf::from(log_dir);
        }
        self
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }

    pub fn distance_mode(&self) -> DistanceKeyMode {
        match self.distance_decimals {
            Some(decimals) => DistanceKeyMode::Rounded { decimals },
            None => DistanceKeyMode::Exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = PipelineConfig::parse("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.distance_mode(), DistanceKeyMode::Exact);
        assert_eq!(config.sources.start_year, 2025);
        assert_eq!(config.download_timeout(), None);
    }

    #[test]
    fn download_timeout_is_read_in_seconds() {
        let config = PipelineConfig::parse("download_timeout_secs = 600").unwrap();
        assert_eq!(config.download_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn file_values_and_env_overrides_combine() {
        let config = PipelineConfig::parse(
            r#"
            data_root = "/srv/taxi"
            distance_decimals = 2
            parquet_compression = "zstd"
            fail_on_missing_keys = true

            [sources]
            start_year = 2024
            "#,
        )
        .unwrap()
        .with_overrides(|key| (key == LOG_DIR_ENV).then(|| "/var/log/taxistar".to_string()));

        assert_eq!(config.data_root, PathBuf::from("/srv/taxi"));
        assert_eq!(config.log_dir, PathBuf::from("/var/log/taxistar"));
        assert_eq!(config.registry_path, PathBuf::from("data/stored_files.json"));
        assert_eq!(config.parquet_compression, ParquetCodec::Zstd);
        assert_eq!(config.distance_mode(), DistanceKeyMode::Rounded { decimals: 2 });
        assert!(config.fail_on_missing_keys);
        assert_eq!(config.sources.start_year, 2024);
        assert!(config.sources.trip_url_template.contains("{year}"));
    }

    #[test]
    fn unknown_compression_is_rejected() {
        assert!(PipelineConfig::parse("parquet_compression = \"lz4\"").is_err());
    }
}
