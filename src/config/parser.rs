use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Relative output paths in the file are taken relative to the file's own
/// directory, so a config works the same from any working directory.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use saga_crawler::config::load_config;
///
/// let config = load_config(Path::new("saga.toml")).unwrap();
/// println!("Delay: {}ms", config.politeness.delay_ms);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Parses and validates configuration text
///
/// Paths are left as written.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex-encoded SHA-256 of configuration text
///
/// Logged at startup so two runs can be matched to the settings they used.
pub fn config_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always matches the settings in use.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        resolve_paths(&mut config, dir);
    }
    Ok((config, config_hash(&content)))
}

/// Anchors relative output paths at `dir`
fn resolve_paths(config: &mut Config, dir: &Path) {
    let anchor = |value: &mut String| {
        if Path::new(value.as_str()).is_relative() {
            *value = dir.join(value.as_str()).to_string_lossy().into_owned();
        }
    };
    anchor(&mut config.output.database_path);
    anchor(&mut config.output.progress_dir);
    if let Some(story_dir) = config.output.story_dir.as_mut() {
        anchor(story_dir);
    }
    if let Some(settings) = config.index.settings_path.as_mut() {
        anchor(settings);
    }
}
