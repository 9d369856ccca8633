use std::path::{Path, PathBuf};

use schemaward_common::{Error, Result};
use tracing::debug;

use crate::model::MigrationConfig;

/// Resolve the ordered statement list for `config`.
///
/// Relative `statements_dir` values are resolved against `base_dir`,
/// normally the directory holding the config file.
pub fn load_statements(config: &MigrationConfig, base_dir: &Path) -> Result<Vec<String>> {
    match &config.statements_dir {
        Some(_) if !config.statements.is_empty() => Err(Error::Config(
            "set either migration.statements or migration.statements_dir, not both".into(),
        )),
        Some(dir) => read_statement_dir(&base_dir.join(dir)),
        None => {
            for (index, statement) in config.statements.iter().enumerate() {
                if statement.trim().is_empty() {
                    return Err(Error::Statements(format!(
                        "inline statement {index} is empty"
                    )));
                }
            }
            Ok(config.statements.clone())
        }
    }
}

/// Read every `*.sql` file in `dir`, ordered by file name. Each file is one
/// version step, so names need a sortable prefix such as `0001_`.
pub fn read_statement_dir(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Statements(format!("failed to read {}: {e}", dir.display()))
    })?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let mut statements = Vec::with_capacity(files.len());
    for path in files {
        let sql = std::fs::read_to_string(&path)?;
        if sql.trim().is_empty() {
            return Err(Error::Statements(format!("{} is empty", path.display())));
        }
        statements.push(sql);
    }

    debug!(
        "loaded {} statements from {}",
        statements.len(),
        dir.display()
    );
    Ok(statements)
}
