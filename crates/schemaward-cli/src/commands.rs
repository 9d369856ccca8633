use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use schemaward_config::{AppConfig, ConfigLoader, apply_overrides, load_statements};
use schemaward_db::{Database, DatabaseOptions, MigrateError, SchemaState};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::Target;

/// Config merged from file, environment and flags, plus the directory
/// relative statement paths are resolved against.
struct Resolved {
    config: AppConfig,
    base_dir: PathBuf,
}

fn resolve(target: &Target) -> Result<Resolved> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;

    let (mut config, base_dir) = match &target.config {
        Some(path) => {
            let mut config = ConfigLoader::load_file(path)?;
            apply_overrides(&mut config, |key| std::env::var(key).ok())?;
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());
            (config, base)
        }
        None => {
            let loader = ConfigLoader::new()?;
            let base = match loader.find_config_file() {
                Some(_) => loader.config_dir().to_path_buf(),
                None => cwd.clone(),
            };
            (loader.load()?, base)
        }
    };

    if let Some(database) = &target.database {
        config.database.path = Some(database.clone());
    }
    if let Some(owner_id) = target.owner_id {
        config.migration.owner_id = owner_id;
    }
    if let Some(dir) = &target.dir {
        config.migration.statements.clear();
        config.migration.statements_dir = Some(cwd.join(dir));
    }

    Ok(Resolved { config, base_dir })
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let Some(path) = config.database.path.clone() else {
        bail!("no database given: pass --database or set database.path");
    };
    let options = DatabaseOptions {
        busy_timeout: config.database.busy_timeout(),
        journal_mode: config.database.journal_mode.clone(),
    };
    Ok(Database::with_options(path, options))
}

pub async fn migrate(target: Target) -> Result<()> {
    let Resolved { config, base_dir } = resolve(&target)?;
    config.validate()?;

    let statements = load_statements(&config.migration, &base_dir)?;
    let db = Arc::new(open_database(&config)?);
    let owner_id = config.migration.owner_id;
    info!(
        "migrating {} as application id {owner_id} ({} statements)",
        db.path().display(),
        statements.len()
    );

    let mut worker = {
        let db = Arc::clone(&db);
        tokio::task::spawn_blocking(move || schemaward_db::migrate(&db, owner_id, &statements))
    };

    let Some(joined) = supervise(&mut worker, &db, tokio::signal::ctrl_c).await else {
        error!("second interrupt, exiting; SQLite rolls back the unfinished transaction on next open");
        std::process::exit(130);
    };

    joined
        .context("migration task failed")?
        .with_context(|| format!("failed to migrate {}", db.path().display()))?;

    let state = db.state()?;
    println!(
        "{} is at version {} (application id {})",
        db.path().display(),
        state.version,
        state.owner_id
    );
    Ok(())
}

/// Wait for the migration worker. The first `signal` interrupts the
/// migration and keeps waiting for its rollback; a second one gives up and
/// returns `None`.
async fn supervise<S, F>(
    worker: &mut JoinHandle<Result<(), MigrateError>>,
    db: &Database,
    mut signal: S,
) -> Option<Result<Result<(), MigrateError>, JoinError>>
where
    S: FnMut() -> F,
    F: Future,
{
    tokio::select! {
        biased;
        joined = &mut *worker => return Some(joined),
        _ = signal() => {}
    }

    warn!("interrupt received, rolling back migration (press Ctrl-C again to exit now)");
    db.interrupt();

    tokio::select! {
        biased;
        joined = &mut *worker => Some(joined),
        _ = signal() => None,
    }
}

pub fn status(target: Target, json: bool) -> Result<()> {
    let Resolved { config, base_dir } = resolve(&target)?;
    let db = open_database(&config)?;
    let state = db
        .state()
        .with_context(|| format!("failed to read {}", db.path().display()))?;

    let has_source =
        config.migration.statements_dir.is_some() || !config.migration.statements.is_empty();
    let pending = if has_source {
        let statements = load_statements(&config.migration, &base_dir)?;
        Some(state.pending(statements.len()))
    } else {
        None
    };
    let owner_id = (config.migration.owner_id != 0).then_some(config.migration.owner_id);

    if json {
        println!("{}", render_json(db.path(), &state, owner_id, pending)?);
    } else {
        print!("{}", render_text(db.path(), &state, owner_id, pending));
    }
    Ok(())
}

fn render_json(
    path: &Path,
    state: &SchemaState,
    owner_id: Option<u32>,
    pending: Option<usize>,
) -> Result<String> {
    let value = serde_json::json!({
        "database": path.display().to_string(),
        "state": state,
        "owned": owner_id.map(|id| id == state.owner_id),
        "pending": pending,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

fn render_text(
    path: &Path,
    state: &SchemaState,
    owner_id: Option<u32>,
    pending: Option<usize>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("database:    {}\n", path.display()));
    out.push_str(&format!(
        "owner id:    {} (0x{:08x})\n",
        state.owner_id, state.owner_id
    ));
    out.push_str(&format!("generation:  {}\n", state.generation));
    out.push_str(&format!("version:     {}\n", state.version));
    if let Some(expected) = owner_id {
        let owned = if state.owner_id == expected {
            "yes"
        } else if state.is_unclaimed() {
            "unclaimed"
        } else {
            "no"
        };
        out.push_str(&format!("owned:       {owned}\n"));
    }
    if let Some(pending) = pending {
        out.push_str(&format!("pending:     {pending}\n"));
    }
    out
}
