//! Shared database setup for integration tests.

use sqlx::SqlitePool;
use taskherd::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};

/// In-memory pool with the full schema applied.
pub async fn setup_test_db() -> SqlitePool {
    let pool = create_test_pool().await.expect("failed to create test pool");
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .expect("failed to run migrations");
    pool
}
