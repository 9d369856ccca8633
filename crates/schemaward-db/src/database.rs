use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{MigrateError, pragma_error};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings applied to every connection opened from a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// How long a connection waits on a locked file before giving up.
    /// A second migrator blocks at transaction begin for at most this long.
    pub busy_timeout: Duration,
    /// Optional `PRAGMA journal_mode` value, e.g. `"wal"`.
    pub journal_mode: Option<String>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: None,
        }
    }
}

/// Handle to a SQLite file. Holds no connection of its own; every migration
/// opens a dedicated one and closes it before returning.
pub struct Database {
    path: PathBuf,
    options: DatabaseOptions,
    cancelled: AtomicBool,
    next_id: AtomicU64,
    active: Mutex<Vec<(u64, InterruptHandle)>>,
}

/// Snapshot of the metadata slots a migration reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaState {
    /// `PRAGMA application_id`, zero for an unclaimed file.
    pub owner_id: u32,
    /// `PRAGMA schema_version`, zero until the first table/index/view exists.
    pub generation: i64,
    /// `PRAGMA user_version`, the number of statements applied so far.
    pub version: i64,
}

impl SchemaState {
    pub fn read(conn: &Connection) -> Result<Self, MigrateError> {
        let owner_id: i32 = conn
            .pragma_query_value(None, "application_id", |row| row.get(0))
            .map_err(pragma_error("application_id"))?;
        let generation: i64 = conn
            .pragma_query_value(None, "schema_version", |row| row.get(0))
            .map_err(pragma_error("schema_version"))?;
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(pragma_error("user_version"))?;

        Ok(Self {
            owner_id: owner_id as u32,
            generation,
            version,
        })
    }

    /// Number of statements in a list of `len` that have not been applied.
    pub fn pending(&self, len: usize) -> usize {
        let applied = usize::try_from(self.version).unwrap_or(0);
        len.saturating_sub(applied)
    }

    pub fn is_unclaimed(&self) -> bool {
        self.owner_id == 0 && self.generation == 0
    }
}

impl Database {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, DatabaseOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: DatabaseOptions) -> Self {
        Self {
            path: path.into(),
            options,
            cancelled: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Open a fresh read-write connection, creating the file if needed.
    pub fn connect(&self) -> Result<Connection, MigrateError> {
        debug!("opening connection to {}", self.path.display());
        let conn = Connection::open(&self.path).map_err(MigrateError::Connect)?;
        self.configure(&conn)?;
        Ok(conn)
    }

    /// Read the metadata slots without modifying (or creating) the file.
    pub fn state(&self) -> Result<SchemaState, MigrateError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(MigrateError::Connect)?;
        conn.busy_timeout(self.options.busy_timeout)
            .map_err(MigrateError::Connect)?;
        SchemaState::read(&conn)
    }

    /// Cancel the migrations currently running through this handle.
    ///
    /// In-flight SQLite calls are interrupted, a migration waiting for the
    /// file lock gives up, and the engine stops before the next statement.
    /// If nothing is running, the next migration started on this handle is
    /// cancelled instead.
    pub fn interrupt(&self) {
        info!("interrupting migration on {}", self.path.display());
        // Set under the lock so a finishing migration cannot clear it unseen.
        let active = self.active_handles();
        self.cancelled.store(true, Ordering::SeqCst);
        for (_, handle) in active.iter() {
            handle.interrupt();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn track(&self) -> ActiveMigration<'_> {
        ActiveMigration {
            db: self,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn configure(&self, conn: &Connection) -> Result<(), MigrateError> {
        conn.busy_timeout(self.options.busy_timeout)
            .map_err(MigrateError::Connect)?;
        if let Some(mode) = &self.options.journal_mode {
            let applied: String = conn
                .pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))
                .map_err(pragma_error("journal_mode"))?;
            debug!("journal_mode = {applied}");
        }
        Ok(())
    }

    fn active_handles(&self) -> MutexGuard<'_, Vec<(u64, InterruptHandle)>> {
        // A panic while holding the lock leaves the list itself consistent.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registration of one running migration. Dropping it unregisters the
/// connection and, once no migration is left, clears the cancellation flag.
pub(crate) struct ActiveMigration<'a> {
    db: &'a Database,
    id: u64,
}

impl ActiveMigration<'_> {
    pub(crate) fn attach(&self, conn: &Connection) {
        self.db
            .active_handles()
            .push((self.id, conn.get_interrupt_handle()));
    }
}

impl Drop for ActiveMigration<'_> {
    fn drop(&mut self) {
        let mut active = self.db.active_handles();
        active.retain(|(id, _)| *id != self.id);
        if active.is_empty() {
            self.db.cancelled.store(false, Ordering::SeqCst);
        }
    }
}
