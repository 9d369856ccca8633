use thiserror::Error;

/// Failure of a single migrate call. Every variant is returned after the
/// transaction has been rolled back, so the file is unchanged.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("failed to open database connection: {0}")]
    Connect(#[source] rusqlite::Error),

    #[error("failed to begin exclusive transaction: {0}")]
    Begin(#[source] rusqlite::Error),

    #[error("failed to access pragma {pragma}: {source}")]
    Pragma {
        pragma: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration statement {index} failed: {source}")]
    Statement {
        index: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to commit migration: {0}")]
    Commit(#[source] rusqlite::Error),

    #[error("database is owned by application id {found}, expected {expected}")]
    WrongOwner { expected: u32, found: u32 },

    #[error("stored schema version {0} is negative")]
    InvalidVersion(i64),

    #[error("schema version {0} does not fit in user_version")]
    VersionOverflow(usize),

    #[error("migration interrupted")]
    Interrupted,
}

impl MigrateError {
    /// The file belongs to another application. Retrying will not help.
    pub fn is_wrong_owner(&self) -> bool {
        matches!(self, Self::WrongOwner { .. })
    }

    /// Index of the statement that failed, if a statement was the cause.
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            Self::Statement { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Wrap a failed pragma read or write in [`MigrateError::Pragma`].
pub(crate) fn pragma_error(pragma: &'static str) -> impl FnOnce(rusqlite::Error) -> MigrateError {
    move |source| MigrateError::Pragma { pragma, source }
}

impl From<MigrateError> for schemaward_common::Error {
    fn from(e: MigrateError) -> Self {
        schemaward_common::Error::Database(e.to_string())
    }
}
