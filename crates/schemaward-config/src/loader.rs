use std::path::{Path, PathBuf};

use schemaward_common::{Error, Result};
use tracing::{debug, info};

use crate::model::{AppConfig, parse_owner_id};

const CONFIG_FILE_NAMES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

pub const DATABASE_ENV: &str = "SCHEMAWARD_DATABASE";
pub const OWNER_ID_ENV: &str = "SCHEMAWARD_OWNER_ID";

/// Locates and parses the schemaward config file.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Use the platform config directory, e.g. `~/.config/schemaward`.
    pub fn new() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Config("could not determine config directory".into()))?;
        Ok(Self::with_dir(base.join("schemaward")))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// First config file present in the config directory, if any.
    pub fn find_config_file(&self) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|path| path.is_file())
    }

    /// Load the config from the config directory, falling back to defaults
    /// when no file exists. Environment overrides are applied either way.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => Self::load_file(&path)?,
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                AppConfig::default()
            }
        };
        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a single file; the format is chosen by its extension.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)?,
            "toml" => toml::from_str(&contents)?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };
        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// Apply `SCHEMAWARD_*` overrides, reading variables through `lookup`.
pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
        debug!("{DATABASE_ENV} overrides database.path");
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(raw) = lookup(OWNER_ID_ENV).filter(|v| !v.is_empty()) {
        debug!("{OWNER_ID_ENV} overrides migration.owner_id");
        config.migration.owner_id = parse_owner_id(&raw)?;
    }
    Ok(())
}
