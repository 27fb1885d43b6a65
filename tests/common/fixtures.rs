use std::path::PathBuf;
use statetaxfinder::config::{AppConfig, DEFAULT_CONFIG};
use statetaxfinder::state_config::{load_state_config, StateConfig};

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn load_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", relative))
}

/// The bundled application config template.
pub fn default_app_config() -> AppConfig {
    AppConfig::from_toml_str(DEFAULT_CONFIG).expect("bundled config template is valid")
}

/// A bundled example state config (`ny.yaml`, `ca.yaml`) with its URLs pointed elsewhere.
pub fn example_state_config(file: &str, primary_url: &str, backup_urls: &[&str]) -> StateConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("state_configs").join(file);
    let mut config = load_state_config(&path)
        .unwrap_or_else(|e| panic!("Failed to load example state config {}: {}", file, e));
    config.primary_url = primary_url.to_string();
    config.backup_urls = backup_urls.iter().map(|u| u.to_string()).collect();
    config
}
