//! Per-state extraction jobs loaded from a directory of config files
//!
//! Supports:
//! - YAML (`.yaml` / `.yml`), JSON and TOML files, one state per file
//! - Default section catalog with per-state overrides and extra keyword hints
//! - Batch validation: unique state codes, non-empty and parseable URLs
//! - Error resilience (an invalid file is reported and skipped, other states still load)

use crate::deriver::DerivationContext;
use crate::section::{default_catalog, SectionSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Content-region hints live under this key of `fallback_selectors`
pub const CONTENT_AREA_HINT: &str = "content_area";

#[derive(Error, Debug)]
pub enum StateConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{path}: field '{field}' cannot be empty")]
    EmptyField { path: PathBuf, field: String },

    #[error("{path}: invalid URL in '{field}': {url}")]
    InvalidUrl { path: PathBuf, field: String, url: String },

    #[error("Duplicate state code '{code}' in {second} (already defined in {first})")]
    DuplicateStateCode {
        code: String,
        first: PathBuf,
        second: PathBuf,
    },
}

fn default_entity_type() -> String {
    "C_corp".to_string()
}

fn default_industry() -> String {
    "shipping".to_string()
}

/// One jurisdiction's extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    pub state_name: String,
    /// Unique within a batch
    pub state_code: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(alias = "tax_definitions_url")]
    pub primary_url: String,
    /// Tried in order when the primary URL fails
    #[serde(default)]
    pub backup_urls: Vec<String>,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_industry")]
    pub industry: String,
    /// Section keys to extract; empty means every section
    #[serde(default)]
    pub included_fields: Vec<String>,
    /// `<key>_keywords` entries add alias phrases to the matching section
    #[serde(default, deserialize_with = "string_or_list_map")]
    pub extraction_hints: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "string_or_list_map")]
    pub fallback_selectors: BTreeMap<String, Vec<String>>,
    /// Replace or add sections by key
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub nexus_standard: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub nexus_effective_date: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub sales_factor_method: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub sales_factor_date: String,
}

/// Hand-written configs write years as bare numbers.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Text(s)) => s,
        Some(Scalar::Int(i)) => i.to_string(),
        Some(Scalar::Float(f)) => f.to_string(),
        Some(Scalar::Bool(b)) => b.to_string(),
        None => String::new(),
    })
}

/// Map values may be a single string or a list of strings.
fn string_or_list_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let raw = Option::<BTreeMap<String, OneOrMany>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let values = match v {
                OneOrMany::One(s) => vec![s],
                OneOrMany::Many(list) => list,
            };
            (k, values)
        })
        .collect())
}

impl StateConfig {
    /// Primary URL followed by backups, in order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_url.as_str()).chain(self.backup_urls.iter().map(String::as_str))
    }

    /// Sections to extract for this state, in catalog order.
    pub fn sections(&self) -> Vec<SectionSpec> {
        let mut sections = default_catalog();

        for custom in &self.sections {
            match sections.iter_mut().find(|s| s.key.eq_ignore_ascii_case(&custom.key)) {
                Some(existing) => *existing = custom.clone(),
                None => sections.push(custom.clone()),
            }
        }

        for section in sections.iter_mut() {
            let hint_key = format!("{}_keywords", section.key.to_lowercase());
            if let Some(extra) = self.extraction_hints.get(&hint_key) {
                for phrase in extra {
                    if !section.aliases.iter().any(|a| a.eq_ignore_ascii_case(phrase)) {
                        section.aliases.push(phrase.clone());
                    }
                }
            }
        }

        if self.included_fields.is_empty() {
            return sections;
        }
        sections
            .into_iter()
            .filter(|s| self.included_fields.iter().any(|f| f.eq_ignore_ascii_case(&s.key)))
            .collect()
    }

    /// Global content selectors followed by this state's content-area hints.
    pub fn content_selectors(&self, defaults: &[String]) -> Vec<String> {
        let mut selectors = defaults.to_vec();
        if let Some(hints) = self.fallback_selectors.get(CONTENT_AREA_HINT) {
            selectors.extend(hints.iter().cloned());
        }
        selectors
    }

    pub fn context(&self) -> DerivationContext {
        DerivationContext {
            state_name: self.state_name.clone(),
            state_code: self.state_code.clone(),
            entity_type: self.entity_type.clone(),
            industry: self.industry.clone(),
        }
    }

    /// Command-line entity and industry take precedence over file values.
    pub fn apply_overrides(&mut self, entity_type: Option<&str>, industry: Option<&str>) {
        if let Some(entity) = entity_type {
            self.entity_type = entity.to_string();
        }
        if let Some(industry) = industry {
            self.industry = industry.to_string();
        }
    }

    /// Check required fields and URL syntax.
    pub fn validate(&self, path: &Path) -> std::result::Result<(), StateConfigError> {
        for (field, value) in [("state_name", &self.state_name), ("state_code", &self.state_code), ("primary_url", &self.primary_url)] {
            if value.trim().is_empty() {
                return Err(StateConfigError::EmptyField {
                    path: path.to_path_buf(),
                    field: field.to_string(),
                });
            }
        }

        let urls = std::iter::once(("primary_url", &self.primary_url))
            .chain(self.backup_urls.iter().map(|u| ("backup_urls", u)));
        for (field, url) in urls {
            let valid = url::Url::parse(url)
                .map(|u| u.scheme() == "http" || u.scheme() == "https")
                .unwrap_or(false);
            if !valid {
                return Err(StateConfigError::InvalidUrl {
                    path: path.to_path_buf(),
                    field: field.to_string(),
                    url: url.clone(),
                });
            }
        }

        Ok(())
    }
}

/// State config file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            Some("json") => Some(Self::Json),
            Some("toml") => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Parse one state config from text in the given format.
pub fn parse_state_config(content: &str, format: ConfigFormat, path: &Path) -> std::result::Result<StateConfig, StateConfigError> {
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str::<StateConfig>(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str::<StateConfig>(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str::<StateConfig>(content).map_err(|e| e.to_string()),
    };

    let mut config = parsed.map_err(|message| StateConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;
    config.state_code = config.state_code.trim().to_uppercase();
    config.validate(path)?;
    Ok(config)
}

/// Read and parse a single state config file.
pub fn load_state_config(path: &Path) -> std::result::Result<StateConfig, StateConfigError> {
    let format = ConfigFormat::from_path(path).ok_or_else(|| StateConfigError::Parse {
        path: path.to_path_buf(),
        message: "expected a .yaml, .yml, .json or .toml file".to_string(),
    })?;
    let content = fs::read_to_string(path).map_err(|source| StateConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_state_config(&content, format, path)
}

/// Valid configs from a directory plus the files that were rejected.
#[derive(Debug, Default)]
pub struct StateConfigSet {
    pub configs: Vec<StateConfig>,
    pub errors: Vec<StateConfigError>,
}

impl StateConfigSet {
    /// Keep only the requested state codes, preserving request order.
    /// Returns the requested codes that have no config.
    pub fn select(&mut self, codes: &[String]) -> Vec<String> {
        if codes.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        let mut missing = Vec::new();
        for code in codes {
            let code = code.trim().to_uppercase();
            if selected.iter().any(|c: &StateConfig| c.state_code == code) {
                continue;
            }
            match self.configs.iter().position(|c| c.state_code == code) {
                Some(idx) => selected.push(self.configs.remove(idx)),
                None => missing.push(code),
            }
        }
        self.configs = selected;
        missing
    }

    pub fn apply_overrides(&mut self, entity_type: Option<&str>, industry: Option<&str>) {
        for config in &mut self.configs {
            config.apply_overrides(entity_type, industry);
        }
    }
}

/// Load every state config in `dir`, sorted by file name.
///
/// An unreadable directory is an error; invalid files and duplicate state codes
/// are collected in [`StateConfigSet::errors`] and skipped.
pub fn load_state_configs(dir: &Path) -> Result<StateConfigSet> {
    let entries = fs::read_dir(dir)
        .context(format!("Failed to read state config directory: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && ConfigFormat::from_path(p).is_some())
        .collect();
    paths.sort();

    let mut set = StateConfigSet::default();
    let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();

    for path in paths {
        match load_state_config(&path) {
            Ok(config) => {
                if let Some(first) = origins.get(&config.state_code) {
                    warn!("Skipping {}: duplicate state code {}", path.display(), config.state_code);
                    set.errors.push(StateConfigError::DuplicateStateCode {
                        code: config.state_code.clone(),
                        first: first.clone(),
                        second: path,
                    });
                    continue;
                }
                debug!("Loaded state config {} from {}", config.state_code, path.display());
                origins.insert(config.state_code.clone(), path);
                set.configs.push(config);
            }
            Err(e) => {
                warn!("Skipping invalid state config: {}", e);
                set.errors.push(e);
            }
        }
    }

    Ok(set)
}

/// Example configurations written by the `example-configs` subcommand.
pub fn example_configs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ny.yaml", include_str!("../state_configs/ny.yaml")),
        ("ca.yaml", include_str!("../state_configs/ca.yaml")),
    ]
}

/// Write the example configs into `dir`, leaving existing files untouched.
/// Returns the paths that were written.
pub fn write_example_configs(dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .context(format!("Failed to create state config directory: {}", dir.display()))?;

    let mut written = Vec::new();
    for (name, content) in example_configs() {
        let path = dir.join(name);
        if path.exists() {
            debug!("Not overwriting existing {}", path.display());
            continue;
        }
        fs::write(&path, content).context(format!("Failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
