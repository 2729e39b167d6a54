//! Database migration runner with advisory lock support

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

/// Advisory lock ID for migrations (arbitrary but stable)
const MIGRATION_LOCK_ID: i64 = 7319;

/// Run all pending migrations with advisory locking
///
/// `vector_dim` is substituted into the schema DDL so the `vector(N)` column
/// and its index match the configured embedding dimension.
///
/// # Errors
///
/// Returns an error when the advisory lock cannot be taken or a migration
/// statement fails; the failed migration's transaction is rolled back.
pub async fn run_migrations(pool: &PgPool, vector_dim: usize) -> Result<()> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .context("Failed to acquire migration lock")?;

    // Ensure lock is released even on error
    let result = run_migrations_inner(pool, vector_dim).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .context("Failed to release migration lock")?;

    result
}

/// Internal migration runner
async fn run_migrations_inner(pool: &PgPool, vector_dim: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ DEFAULT NOW()
        )
    "#,
    )
    .execute(pool)
    .await
    .context("Failed to create migrations table")?;

    let applied: Vec<i32> = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to fetch applied migrations")?
        .iter()
        .map(|row| row.get(0))
        .collect();

    // Migration definitions
    let migrations = vec![
        (
            1,
            "initial_schema",
            include_str!("../migrations/001_initial_schema.sql"),
        ),
        (2, "indexes", include_str!("../migrations/002_indexes.sql")),
    ];

    for (version, name, sql) in migrations {
        if applied.contains(&version) {
            tracing::debug!("Migration {} ({}) already applied", version, name);
            continue;
        }

        tracing::info!("Applying migration {} ({})", version, name);

        let sql = sql.replace("__VECTOR_DIM__", &vector_dim.to_string());

        let mut tx = pool.begin().await.context("Failed to start transaction")?;

        sqlx::query(&sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute migration {version} ({name})"))?;

        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await
            .context("Failed to record migration")?;

        tx.commit().await.context("Failed to commit migration")?;

        tracing::info!("Migration {} ({}) completed", version, name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {

    #[test]
    fn test_migration_sql_embedded() {
        let sql1 = include_str!("../migrations/001_initial_schema.sql");
        assert!(sql1.contains("CREATE TABLE"));
        assert!(sql1.contains("__VECTOR_DIM__"));

        let sql2 = include_str!("../migrations/002_indexes.sql");
        assert!(sql2.contains("CREATE INDEX"));
    }

    #[test]
    fn test_dimension_substitution() {
        let sql = include_str!("../migrations/001_initial_schema.sql")
            .replace("__VECTOR_DIM__", "768");
        assert!(sql.contains("vector(768)"));
        assert!(!sql.contains("__VECTOR_DIM__"));
    }
}
