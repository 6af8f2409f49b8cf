//! Configuration file loading.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::files::{FileRegistry, InputFile};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Operating mode. Inferred from `target.server` when absent.
    pub mode: Option<Mode>,
    /// Collector settings.
    pub server: ServerConfig,
    /// Sender settings.
    pub target: TargetConfig,
    /// Files to ship in sender mode.
    #[serde(rename = "input")]
    pub inputs: Vec<InputConfig>,
    /// Metrics endpoint settings.
    pub metrics: MetricsConfig,
    /// Compatibility toggles.
    pub compat: CompatConfig,
}

/// Whether this process receives streams or ships them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Accept connections and write sinks.
    Server,
    /// Tail local files and ship them.
    Client,
}

/// Settings for collector mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub listen_address: String,
    /// Directory under which sink files are created.
    pub base_directory: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:7007".to_string(),
            base_directory: PathBuf::from("/var/log/logship"),
        }
    }
}

/// Settings for sender mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// `host:port` of the collector.
    pub server: String,
    /// Hostname announced in `INIT`. Falls back to `$HOSTNAME`, then
    /// `localhost`.
    pub hostname: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            hostname: None,
        }
    }
}

impl TargetConfig {
    /// The hostname to announce to the collector.
    #[must_use]
    pub fn announced_hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// One `[[input]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Logical name.
    pub name: String,
    /// Local path to tail.
    pub path: PathBuf,
    /// Watch for filesystem notifications.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

/// `[metrics]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve a `/metrics` endpoint.
    pub enabled: bool,
    /// `host:port` for the endpoint.
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9081".to_string(),
        }
    }
}

/// `[compat]` section: behaviors kept for wire compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatConfig {
    /// After a transient transport failure mid-round, pull the send position
    /// back by one buffer so no bytes are lost at the cost of possible
    /// duplication.
    pub rewind_on_error: bool,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            rewind_on_error: true,
        }
    }
}

impl Config {
    /// The effective mode: explicit setting, else client when a target
    /// server is configured.
    #[must_use]
    pub fn effective_mode(&self) -> Mode {
        self.mode.unwrap_or_else(|| {
            if self.target.server.is_empty() {
                Mode::Server
            } else {
                Mode::Client
            }
        })
    }

    /// Build the input file registry from the `[[input]]` entries.
    #[must_use]
    pub fn file_registry(&self) -> FileRegistry {
        let mut registry = FileRegistry::new();
        for input in &self.inputs {
            registry.add_input(InputFile {
                name: input.name.clone(),
                path: input.path.clone(),
                watch: input.watch,
            });
        }
        registry
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader with the default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("logship.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("logship").join("config.toml"));
        }
        Self { search_paths }
    }

    /// Create a loader bound to one specific file.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load from the first existing file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or
    /// parsed.
    pub fn load(&self) -> Result<Config, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })
    }

    /// The search paths, for diagnostics.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_address, "127.0.0.1:7007");
        assert_eq!(config.server.base_directory, PathBuf::from("/var/log/logship"));
        assert!(!config.metrics.enabled);
        assert!(config.compat.rewind_on_error);
        assert_eq!(config.effective_mode(), Mode::Server);
    }

    #[test]
    fn test_mode_inferred_from_target() {
        let config = Config {
            target: TargetConfig {
                server: "collector:7007".to_string(),
                hostname: None,
            },
            ..Config::default()
        };
        assert_eq!(config.effective_mode(), Mode::Client);
    }

    #[test]
    fn test_explicit_mode_wins() {
        let config = Config {
            mode: Some(Mode::Server),
            target: TargetConfig {
                server: "collector:7007".to_string(),
                hostname: None,
            },
            ..Config::default()
        };
        assert_eq!(config.effective_mode(), Mode::Server);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            mode = "client"

            [server]
            listen_address = "0.0.0.0:7007"
            base_directory = "/srv/logs"

            [target]
            server = "collector.example.com:7007"
            hostname = "web01"

            [[input]]
            name = "authlog"
            path = "/var/log/auth.log"

            [[input]]
            name = "syslog"
            path = "/var/log/syslog"
            watch = false

            [metrics]
            enabled = true
            listen = "127.0.0.1:9099"

            [compat]
            rewind_on_error = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.effective_mode(), Mode::Client);
        assert_eq!(config.server.base_directory, PathBuf::from("/srv/logs"));
        assert_eq!(config.target.announced_hostname(), "web01");
        assert_eq!(config.inputs.len(), 2);
        assert!(config.inputs[0].watch, "watch defaults to true");
        assert!(!config.inputs[1].watch);
        assert!(config.metrics.enabled);
        assert!(!config.compat.rewind_on_error);

        let registry = config.file_registry();
        assert!(registry
            .find_by_path(std::path::Path::new("/var/log/auth.log"))
            .is_some());
    }

    #[test]
    fn test_loader_returns_defaults_when_no_file() {
        let loader = ConfigLoader::with_path(PathBuf::from("/nonexistent/logship.toml"));
        let config = loader.load().unwrap();
        assert_eq!(config.effective_mode(), Mode::Server);
    }

    #[test]
    fn test_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[target]\nserver = \"collector:7007\"").unwrap();
        file.flush().unwrap();

        let loader = ConfigLoader::with_path(file.path().to_path_buf());
        let config = loader.load().unwrap();
        assert_eq!(config.effective_mode(), Mode::Client);
    }

    #[test]
    fn test_loader_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode = [not toml").unwrap();
        file.flush().unwrap();

        let loader = ConfigLoader::with_path(file.path().to_path_buf());
        assert!(matches!(loader.load(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_loader_default_search_paths() {
        let loader = ConfigLoader::new();
        assert!(loader.search_paths()[0].ends_with("logship.toml"));
    }
}
