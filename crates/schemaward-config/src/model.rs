use std::path::PathBuf;
use std::time::Duration;

use schemaward_common::{Error, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub journal_mode: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: None,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Where the ordered statement list comes from. Set `statements` or
/// `statements_dir`, not both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Application id stamped into the database file. Must be non-zero.
    pub owner_id: u32,
    pub statements: Vec<String>,
    /// Directory of `*.sql` files, applied in file name order.
    pub statements_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Reject configs the migration engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.migration.owner_id == 0 {
            return Err(Error::Config("migration.owner_id must be non-zero".into()));
        }
        if self.database.path.is_none() {
            return Err(Error::Config("database.path is not set".into()));
        }
        if self.migration.statements_dir.is_some() && !self.migration.statements.is_empty() {
            return Err(Error::Config(
                "set either migration.statements or migration.statements_dir, not both".into(),
            ));
        }
        Ok(())
    }
}

/// Parse an owner id written in decimal or as `0x`-prefixed hex.
pub fn parse_owner_id(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => raw.replace('_', "").parse(),
    };
    parsed.map_err(|e| Error::Config(format!("invalid owner id {raw:?}: {e}")))
}
