//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// Name of the workspace configuration file.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a workspace directory.
///
/// Reads `<workspace_dir>/kiln.toml`, parses it, and validates required fields.
pub fn load_config(workspace_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = workspace_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and cross references resolve.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    if config.workspace.name.is_empty() {
        return Err(ConfigError::MissingField("workspace.name".to_string()));
    }
    if config.scan.chunk_size == 0 {
        return Err(ConfigError::ValidationError(
            "scan.chunk_size must be greater than zero".to_string(),
        ));
    }
    for (name, module) in &config.modules {
        if module.source_root.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "modules.{name}.source_root"
            )));
        }
        for dep in &module.dependencies {
            if !config.modules.contains_key(dep) {
                return Err(ConfigError::UnknownModule(dep.clone()));
            }
        }
    }
    for (name, target) in &config.targets {
        if target.modules.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "target '{name}' lists no modules"
            )));
        }
        for module in &target.modules {
            if !config.modules.contains_key(module) {
                return Err(ConfigError::UnknownModule(module.clone()));
            }
        }
    }
    Ok(())
}
