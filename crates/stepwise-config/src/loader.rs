use std::path::Path;

use serde_json::Value;
use stepwise_common::{Error, Result};
use tracing::{debug, info};

use crate::model::{DbConfig, MigrateSettings};

pub const DEFAULT_CONFIG_FILE: &str = "default-config.json";
pub const DEFAULT_DB_PROPERTY: &str = "appDb";
/// Optional section holding [`MigrateSettings`].
pub const SETTINGS_PROPERTY: &str = "migrate";

/// Loads a [`DbConfig`] from a config document or an inline JSON string.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read `path` and take the connection descriptor stored under `property`.
    pub fn load(path: &Path, property: &str) -> Result<DbConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {e}", path.display()))
        })?;

        let document = parse_document(path, &contents)?;
        let section = document.get(property).cloned().ok_or_else(|| {
            Error::Config(format!(
                "property `{property}` not found in {}",
                path.display()
            ))
        })?;

        let config: DbConfig = serde_json::from_value(section).map_err(|e| {
            Error::Config(format!(
                "invalid `{property}` section in {}: {e}",
                path.display()
            ))
        })?;

        info!("loaded database config from {}", path.display());
        Self::finish(config)
    }

    /// Parse a descriptor passed directly on the command line or environment.
    pub fn from_json(json: &str) -> Result<DbConfig> {
        let config: DbConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid inline database config: {e}")))?;
        debug!("using inline database config");
        Self::finish(config)
    }

    /// Inline JSON wins over the config file when both are available.
    pub fn resolve(inline: Option<&str>, path: &Path, property: &str) -> Result<DbConfig> {
        match inline {
            Some(json) => Self::from_json(json),
            None => Self::load(path, property),
        }
    }

    /// Runner settings from the `migrate` section of `path`. A missing file or
    /// section yields the defaults.
    pub fn load_settings(path: &Path) -> Result<MigrateSettings> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MigrateSettings::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read config {}: {e}",
                    path.display()
                )));
            }
        };

        match parse_document(path, &contents)?.get(SETTINGS_PROPERTY) {
            Some(section) => serde_json::from_value(section.clone()).map_err(|e| {
                Error::Config(format!(
                    "invalid `{SETTINGS_PROPERTY}` section in {}: {e}",
                    path.display()
                ))
            }),
            None => Ok(MigrateSettings::default()),
        }
    }

    fn finish(config: DbConfig) -> Result<DbConfig> {
        let config = config.with_defaults();
        config.validate()?;
        Ok(config)
    }
}

fn parse_document(path: &Path, contents: &str) -> Result<Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
        "toml" => {
            toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
        }
        _ => serde_json::from_str(contents)
            .map_err(|e| Error::Config(format!("JSON parse error: {e}"))),
    }
}
