//! Forward-only migration engine.
//!
//! The statement list is append-only: statement `i` moves the schema from
//! version `i` to `i + 1`, and `PRAGMA user_version` records how many have
//! been applied. All pending statements, the owner claim and the version
//! bump commit together in one exclusive transaction or not at all.

use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::error::{MigrateError, pragma_error};

/// Busy-timeout slice used while polling for the exclusive lock.
const LOCK_POLL: Duration = Duration::from_millis(50);

/// How a run waits for the file lock and learns it was cancelled.
struct Control<'a> {
    /// Total time to wait for the exclusive lock, polled in [`LOCK_POLL`]
    /// slices. `None` leaves waiting to the connection's busy timeout.
    lock_wait: Option<Duration>,
    cancelled: &'a dyn Fn() -> bool,
}

/// Apply every statement of `statements` the file has not seen yet.
///
/// Opens a dedicated connection from `db`, which is closed before returning.
/// A file whose `application_id` differs from `owner_id` is only claimed when
/// it has no schema yet; otherwise [`MigrateError::WrongOwner`] is returned.
///
/// # Panics
///
/// Panics if `owner_id` is zero.
pub fn migrate<S: AsRef<str>>(
    db: &Database,
    owner_id: u32,
    statements: &[S],
) -> Result<(), MigrateError> {
    assert_ne!(owner_id, 0, "migration: owner id can't be 0");

    let active = db.track();
    let mut conn = db.connect().inspect_err(|e| error!("{e}"))?;
    active.attach(&conn);

    let result = if db.is_cancelled() {
        Err(MigrateError::Interrupted)
    } else {
        let control = Control {
            lock_wait: Some(db.options().busy_timeout),
            cancelled: &|| db.is_cancelled(),
        };
        apply(&mut conn, owner_id, statements, &control)
    };
    log_failure(result)
}

/// Same as [`migrate`], over a connection the caller already holds.
///
/// # Panics
///
/// Panics if `owner_id` is zero.
pub fn migrate_connection<S: AsRef<str>>(
    conn: &mut Connection,
    owner_id: u32,
    statements: &[S],
) -> Result<(), MigrateError> {
    assert_ne!(owner_id, 0, "migration: owner id can't be 0");
    let control = Control {
        lock_wait: None,
        cancelled: &|| false,
    };
    log_failure(apply(conn, owner_id, statements, &control))
}

fn log_failure(result: Result<(), MigrateError>) -> Result<(), MigrateError> {
    if let Err(e) = &result {
        error!("migration failed: {e}");
    }
    result
}

fn apply<S: AsRef<str>>(
    conn: &mut Connection,
    owner_id: u32,
    statements: &[S],
    control: &Control<'_>,
) -> Result<(), MigrateError> {
    // Dropping `tx` without commit rolls back, which covers every `?` below.
    let tx = match control.lock_wait {
        None => conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(MigrateError::Begin)?,
        Some(wait) => {
            // sqlite3_interrupt does not wake a busy wait, so poll in slices.
            let deadline = Instant::now() + wait;
            conn.busy_timeout(wait.min(LOCK_POLL))
                .map_err(MigrateError::Begin)?;
            loop {
                if (control.cancelled)() {
                    return Err(MigrateError::Interrupted);
                }
                match conn.transaction_with_behavior(TransactionBehavior::Exclusive) {
                    Ok(tx) => break tx,
                    Err(_) if (control.cancelled)() => return Err(MigrateError::Interrupted),
                    Err(e) if is_busy(&e) && Instant::now() < deadline => {
                        debug!("waiting for exclusive lock");
                    }
                    Err(e) => return Err(MigrateError::Begin(e)),
                }
            }
        }
    };

    claim_owner(&tx, owner_id)?;

    let stored: i64 = tx
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(pragma_error("user_version"))?;
    let mut version = usize::try_from(stored).map_err(|_| MigrateError::InvalidVersion(stored))?;

    if version > statements.len() {
        warn!(
            "database is at version {version} but only {} statements are known",
            statements.len()
        );
    }

    let start = version;
    for statement in statements.iter().skip(version) {
        if (control.cancelled)() {
            return Err(MigrateError::Interrupted);
        }
        debug!("applying migration statement {version}");
        tx.execute_batch(statement.as_ref())
            .map_err(|source| MigrateError::Statement {
                index: version,
                source,
            })?;
        version += 1;
    }

    let user_version = i32::try_from(version).map_err(|_| MigrateError::VersionOverflow(version))?;
    tx.pragma_update(None, "user_version", user_version)
        .map_err(pragma_error("user_version"))?;

    tx.commit().map_err(MigrateError::Commit)?;

    if version > start {
        info!("migrated database from version {start} to {version}");
    } else {
        debug!("database already at version {version}");
    }
    Ok(())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::DatabaseBusy)
}

/// Check `application_id`, adopting the file when it has never had a schema.
fn claim_owner(tx: &Transaction<'_>, owner_id: u32) -> Result<(), MigrateError> {
    let current: i32 = tx
        .pragma_query_value(None, "application_id", |row| row.get(0))
        .map_err(pragma_error("application_id"))?;
    let current = current as u32;
    if current == owner_id {
        return Ok(());
    }

    let generation: i64 = tx
        .pragma_query_value(None, "schema_version", |row| row.get(0))
        .map_err(pragma_error("schema_version"))?;
    if generation != 0 {
        return Err(MigrateError::WrongOwner {
            expected: owner_id,
            found: current,
        });
    }

    info!("claiming empty database for application id {owner_id}");
    // application_id is a signed 32-bit header field; store the same bits.
    tx.pragma_update(None, "application_id", owner_id as i32)
        .map_err(pragma_error("application_id"))
}
