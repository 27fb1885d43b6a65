//! Configuration management for statetaxfinder
//!
//! All configuration is loaded from `./config/statetaxfinder.toml`.
//! No hardcoded defaults exist in source code - all defaults are in the config template.
//! Oracle credentials are resolved separately from the environment, with a
//! `KEY=VALUE` file as fallback.

use serde::Deserialize;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::fs;
use thiserror::Error;
use tracing::debug;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/statetaxfinder.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/statetaxfinder.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be greater than zero")]
    ZeroValue { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub oracle: OracleConfig,
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
}

/// HTTP client configuration for page fetches
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// LLM oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub default_model: String,
    pub api_key_env: String,
    pub model_env: String,
    pub env_file: String,
    pub timeout_secs: u64,
    pub max_prompt_chars: usize,
    #[serde(default)]
    pub temperature: f32,
}

/// Section extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub state_config_dir: String,
    #[serde(default)]
    pub content_selectors: Vec<String>,
    pub max_visited_elements: usize,
}

/// Output artifact naming
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub output_dir: String,
    pub spreadsheet_prefix: String,
    pub audit_log_name: String,
    pub raw_sections_name: String,
}

/// Credentials for the hosted model, resolved from env or the env file
#[derive(Clone, PartialEq)]
pub struct OracleCredentials {
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for OracleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleCredentials")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

impl OracleConfig {
    /// Resolve the API key and model name.
    ///
    /// Priority for each value: environment variable, then the env file, then
    /// (for the model only) `default_model`. Returns `None` when no API key is found.
    pub fn resolve_credentials(&self) -> Option<OracleCredentials> {
        let file_values = load_env_file(Path::new(&self.env_file));
        let lookup = |name: &str| -> Option<String> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| {
                    file_values
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .filter(|v| !v.trim().is_empty())
                })
        };

        let api_key = lookup(&self.api_key_env)?;
        let model = lookup(&self.model_env).unwrap_or_else(|| self.default_model.clone());
        Some(OracleCredentials { api_key, model })
    }
}

/// Read `KEY=VALUE` pairs from an env file without touching the process environment.
/// A missing or unreadable file yields no values.
pub fn load_env_file(path: &Path) -> Vec<(String, String)> {
    if !path.exists() {
        return Vec::new();
    }
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.filter_map(|item| item.ok()).collect(),
        Err(e) => {
            debug!("Failed to read env file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "http.user_agent".to_string(),
            });
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "http.request_timeout_secs".to_string(),
            });
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::ZeroValue {
                field: "http.max_body_bytes".to_string(),
            });
        }

        if !self.oracle.endpoint.starts_with("https://") && !self.oracle.endpoint.starts_with("http://") {
            return Err(ConfigError::InvalidUrl {
                field: "oracle.endpoint".to_string(),
                url: self.oracle.endpoint.clone(),
            });
        }
        if self.oracle.default_model.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "oracle.default_model".to_string(),
            });
        }
        if self.oracle.api_key_env.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "oracle.api_key_env".to_string(),
            });
        }
        if self.oracle.timeout_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "oracle.timeout_secs".to_string(),
            });
        }
        if self.oracle.max_prompt_chars == 0 {
            return Err(ConfigError::ZeroValue {
                field: "oracle.max_prompt_chars".to_string(),
            });
        }

        if self.extraction.state_config_dir.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "extraction.state_config_dir".to_string(),
            });
        }
        if self.extraction.max_visited_elements == 0 {
            return Err(ConfigError::ZeroValue {
                field: "extraction.max_visited_elements".to_string(),
            });
        }

        if self.output.output_dir.trim().is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "output.output_dir".to_string(),
            });
        }

        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config() -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config()?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
