use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the `filled_forms` table and its ordering index if absent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filled_forms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT,
            version TEXT,
            data TEXT,
            created_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_filled_forms_created_at ON filled_forms(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
