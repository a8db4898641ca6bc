//! SQLite adapters implementing the storage ports.

pub mod connection;
pub mod history_store;
pub mod migrations;
pub mod task_store;

pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use history_store::SqliteHistoryStore;
pub use migrations::{all_embedded_migrations, initial_schema_migration, Migration, MigrationError, Migrator};
pub use task_store::SqliteTaskStore;
