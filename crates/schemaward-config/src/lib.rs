pub mod loader;
pub mod model;
pub mod statements;

pub use loader::{ConfigLoader, apply_overrides};
pub use model::{AppConfig, DatabaseConfig, MigrationConfig, parse_owner_id};
pub use statements::{load_statements, read_statement_dir};
