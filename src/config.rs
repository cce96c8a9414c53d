//! Configuration loading
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file
//! (`tempo.toml`, or the path in `TEMPO_CONFIG_PATH`), then environment
//! variables of the form `TEMPO__SECTION__KEY`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::LanguageMode;
use crate::errors::ScriptError;

const DEFAULT_CONFIG_FILE: &str = "tempo.toml";
const CONFIG_PATH_ENV: &str = "TEMPO_CONFIG_PATH";
const ENV_PREFIX: &str = "TEMPO";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry count above which the script block cache is cleared on insert
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_call_depth: usize,
    pub language_mode: LanguageMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 100,
            language_mode: LanguageMode::Full,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Case-insensitive substrings that refuse compilation
    pub blocked_patterns: Vec<String>,
    /// Case-insensitive substrings that mark a script as suspicious
    pub flagged_patterns: Vec<String>,
    /// Origin prefixes treated as trusted product code
    pub trusted_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file location and the environment
    pub fn load() -> Result<Self, ScriptError> {
        Self::builder().build()
    }

    pub fn to_toml(&self) -> Result<String, ScriptError> {
        toml::to_string_pretty(self).map_err(|e| ScriptError::Config(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    use_env: Option<bool>,
}

impl ConfigBuilder {
    /// Explicit config file; unlike the default location it must exist
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Whether `TEMPO__*` environment variables are applied (default: true)
    pub fn use_env(mut self, use_env: bool) -> Self {
        self.use_env = Some(use_env);
        self
    }

    pub fn build(self) -> Result<Config, ScriptError> {
        let (path, required) = match self.config_path {
            Some(path) => (path, true),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let defaults = config::Config::try_from(&Config::default()).map_err(config_error)?;

        let mut builder = config::Config::builder().add_source(defaults).add_source(
            config::File::from(path.as_path())
                .format(config::FileFormat::Toml)
                .required(required),
        );

        if self.use_env.unwrap_or(true) {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("security.blocked_patterns")
                    .with_list_parse_key("security.flagged_patterns")
                    .with_list_parse_key("security.trusted_origins"),
            );
        }

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

fn config_error(err: config::ConfigError) -> ScriptError {
    ScriptError::Config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.engine.max_call_depth, 100);
        assert_eq!(config.engine.language_mode, LanguageMode::Full);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("tempo-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tempo.toml");
        std::fs::write(
            &path,
            r#"
[cache]
max_entries = 8

[engine]
language_mode = "constrained"

[security]
blocked_patterns = ["format-disk"]
"#,
        )
        .unwrap();

        let config = Config::builder()
            .config_path(&path)
            .use_env(false)
            .build()
            .unwrap();

        assert_eq!(config.cache.max_entries, 8);
        assert!(config.cache.enabled);
        assert_eq!(config.engine.language_mode, LanguageMode::Constrained);
        assert_eq!(config.security.blocked_patterns, vec!["format-disk"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .config_path("/nonexistent/tempo.toml")
            .use_env(false)
            .build();
        assert!(matches!(result, Err(ScriptError::Config(_))));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
