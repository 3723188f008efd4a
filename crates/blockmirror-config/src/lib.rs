use blockmirror_engine::SyncOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value in config file at {config_path}: {message}")]
    InvalidValue {
        config_path: PathBuf,
        message: String,
    },
}

/// Settings read from `config.toml`; every key is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indent_width: usize,
    pub header_lines: usize,
    pub fetch_depth: usize,
    pub page_size: usize,
    pub max_in_flight: usize,
    pub max_attempts: usize,
    pub debounce_ms: u64,
    /// Snapshot cache directory; no cache when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let options = SyncOptions::default();
        Self {
            indent_width: options.indent_width,
            header_lines: options.header_lines,
            fetch_depth: options.fetch_depth,
            page_size: options.page_size,
            max_in_flight: options.max_in_flight,
            max_attempts: options.max_attempts,
            debounce_ms: u64::try_from(options.debounce.as_millis()).unwrap_or(u64::MAX),
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        if let Some(message) = config.validate() {
            return Err(ConfigError::InvalidValue {
                config_path: config_path.to_path_buf(),
                message,
            });
        }

        // Expand shell variables and tilde in the cache path
        config.cache_dir = config
            .cache_dir
            .map(|dir| Self::expand_path(&dir).unwrap_or(dir));

        Ok(Some(config))
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        Ok(Self::load_from_path(&config_path)?.unwrap_or_default())
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/blockmirror");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }

    /// The engine's view of these settings
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            indent_width: self.indent_width,
            header_lines: self.header_lines,
            fetch_depth: self.fetch_depth,
            page_size: self.page_size,
            max_in_flight: self.max_in_flight,
            max_attempts: self.max_attempts,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    fn validate(&self) -> Option<String> {
        let positive = [
            ("indent_width", self.indent_width),
            ("fetch_depth", self.fetch_depth),
            ("page_size", self.page_size),
            ("max_in_flight", self.max_in_flight),
            ("max_attempts", self.max_attempts),
        ];
        positive
            .iter()
            .find(|(_, value)| *value == 0)
            .map(|(name, _)| format!("{name} must be at least 1"))
    }

    fn expand_path(path: &Path) -> Option<PathBuf> {
        let path_str = path.to_string_lossy();
        match shellexpand::full(&path_str) {
            Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_path() {
        let config_path = Config::config_path();
        let path_str = config_path.to_string_lossy();

        assert!(!path_str.starts_with('~'));
        assert!(path_str.ends_with(".config/blockmirror/config.toml"));
    }

    #[test]
    fn test_defaults_match_engine() {
        assert_eq!(Config::default().sync_options(), SyncOptions::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str("indent_width = 4\ndebounce_ms = 50\n").unwrap();
        let options = config.sync_options();

        assert_eq!(options.indent_width, 4);
        assert_eq!(options.debounce, Duration::from_millis(50));
        assert_eq!(options.page_size, SyncOptions::default().page_size);
        assert_eq!(config.cache_dir, None);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let non_existent_config = temp_dir.path().join("nonexistent.toml");

        let result = Config::load_from_path(&non_existent_config).unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("nested").join("config.toml");
        let test_config = Config {
            max_in_flight: 8,
            cache_dir: Some(PathBuf::from("/tmp/blockmirror-cache")),
            ..Config::default()
        };

        test_config.save_to_path(&config_file).unwrap();
        let loaded_config = Config::load_from_path(&config_file).unwrap().unwrap();

        assert_eq!(loaded_config, test_config);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "page_size = 0\n").unwrap();

        let err = Config::load_from_path(&config_file).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "indent_width = \"wide\"\n").unwrap();

        let err = Config::load_from_path(&config_file).unwrap_err();

        assert!(matches!(err, ConfigError::ConfigParseError { .. }));
    }

    #[test]
    fn test_cache_dir_with_tilde() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "cache_dir = \"~/blockmirror/cache\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();
        let cache_dir = config.cache_dir.unwrap();

        assert!(!cache_dir.to_string_lossy().starts_with('~'));
        assert!(cache_dir.to_string_lossy().ends_with("blockmirror/cache"));
    }

    #[test]
    fn test_cache_dir_with_env_var() {
        unsafe {
            env::set_var("BLOCKMIRROR_TEST_ROOT", "/custom/root");
        }
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        std::fs::write(&config_file, "cache_dir = \"$BLOCKMIRROR_TEST_ROOT/cache\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();

        assert_eq!(config.cache_dir, Some(PathBuf::from("/custom/root/cache")));
        unsafe {
            env::remove_var("BLOCKMIRROR_TEST_ROOT");
        }
    }

    #[test]
    fn test_expand_path_with_relative_path() {
        let path = PathBuf::from("relative/path");
        let expanded = Config::expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }
}
