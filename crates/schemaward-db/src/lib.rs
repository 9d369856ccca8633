//! Forward-only schema migrations for SQLite files.
//!
//! A database file is tagged with an owner id (`PRAGMA application_id`) and
//! tracks how many statements of the owner's migration list have been
//! applied (`PRAGMA user_version`). Each call to [`migrate`] applies the
//! remaining statements inside one exclusive transaction.

pub mod database;
pub mod error;
pub mod migrations;

pub use database::{Database, DatabaseOptions, SchemaState};
pub use error::MigrateError;
pub use migrations::{migrate, migrate_connection};
