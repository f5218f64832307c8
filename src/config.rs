//! Store configuration
//!
//! Layered with the `config` crate:
//!
//! ```text
//! defaults  →  TOML file (optional)  →  DATASTORE__* environment
//! ```
//!
//! e.g. `DATASTORE__BUFFER__ENTRIES_PER_BUFFER=4096` or
//! `DATASTORE__COMPACTION__MAX_DEAD_RATIO=0.3`.

use crate::datastore::{BufferTypeConfig, CapacityStats};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DATASTORE";

/// Complete configuration of a store instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub buffer: BufferTypeConfig,
    pub compaction: CompactionConfig,
    pub logging: LoggingConfig,
}

/// When the memory-pressure policy should ask for a compaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Dead share of used entries that triggers compaction
    pub max_dead_ratio: f64,
    /// Ignore dead entries below this count
    pub min_dead_entries: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_dead_ratio: 0.2,
            min_dead_entries: 1024,
        }
    }
}

impl CompactionConfig {
    /// Whether `stats` warrants a compaction
    pub fn should_compact(&self, stats: &CapacityStats) -> bool {
        stats.dead_entries >= self.min_dead_entries && stats.dead_ratio() > self.max_dead_ratio
    }
}

/// Logging setup used by the `datastore` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Directory for the rolling log file
    pub directory: PathBuf,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: PathBuf::from("logs"),
            ansi: true,
        }
    }
}

impl StoreConfig {
    /// Load defaults, then `path` (TOML) if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&StoreConfig::default()).map_err(config_error)?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = ?path, "Loading store configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: StoreConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        loaded.validate()?;
        debug!(?loaded, "Effective store configuration");
        Ok(loaded)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let parsed: StoreConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to render TOML: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        let ratio = self.compaction.max_dead_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::Config(format!(
                "compaction.max_dead_ratio must be within 0.0..=1.0, got {}",
                ratio
            )));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(Error::Config(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn config_error(err: config::ConfigError) -> Error {
    Error::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() -> Result<()> {
        let config = StoreConfig::default();
        config.validate()?;
        assert_eq!(config.logging.level, "info");
        Ok(())
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let mut config = StoreConfig::default();
        config.buffer.entries_per_buffer = 2048;
        config.compaction.max_dead_ratio = 0.5;

        let text = config.to_toml()?;
        assert!(text.contains("entries_per_buffer = 2048"));
        assert_eq!(StoreConfig::from_toml(&text)?, config);
        Ok(())
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = StoreConfig::from_toml("[compaction]\nmin_dead_entries = 10\n")?;
        assert_eq!(config.compaction.min_dead_entries, 10);
        assert_eq!(config.buffer, BufferTypeConfig::default());
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(StoreConfig::from_toml("[compaction]\nmax_dead_ratio = 1.5\n").is_err());
        assert!(StoreConfig::from_toml("[logging]\nlevel = \"loud\"\n").is_err());
        let err = StoreConfig::from_toml("[buffer]\nentries_per_buffer = 0\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("datastore_config_{}.toml", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).map_err(|e| Error::Internal(e.to_string()))?;
            writeln!(file, "[buffer]\nentries_per_buffer = 512\ninitial_entries = 16\n")
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        let config = StoreConfig::load(Some(&path))?;
        assert_eq!(config.buffer.entries_per_buffer, 512);
        assert_eq!(config.buffer.initial_entries, 16);
        assert_eq!(config.compaction, CompactionConfig::default());

        std::fs::remove_file(path).ok();
        Ok(())
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = StoreConfig::load(Some(Path::new("/nonexistent/datastore.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_should_compact() {
        let policy = CompactionConfig {
            max_dead_ratio: 0.25,
            min_dead_entries: 10,
        };
        let mut stats = CapacityStats {
            used_entries: 100,
            dead_entries: 30,
            ..Default::default()
        };
        assert!(policy.should_compact(&stats));

        stats.dead_entries = 20;
        assert!(!policy.should_compact(&stats));

        stats.used_entries = 20;
        stats.dead_entries = 8;
        assert!(!policy.should_compact(&stats));
    }
}
