//! Fill record log backed by the `filled_forms` table.
//!
//! Every statement binds its values as parameters; field data never becomes
//! part of the SQL text.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::FormError;
use crate::models::{FieldMap, FillRecord};

#[derive(Debug, Clone)]
pub struct FillRecordStore {
    pool: SqlitePool,
}

impl FillRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts one record and returns its id.
    pub async fn append(
        &self,
        filename: &str,
        version: &str,
        fields: &FieldMap,
        created_at: DateTime<Utc>,
    ) -> Result<i64, FormError> {
        let data = serde_json::to_string(fields)
            .map_err(|e| FormError::InvalidInput(format!("unserializable fields: {}", e)))?;

        let result = sqlx::query(
            "INSERT INTO filled_forms (filename, version, data, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(filename)
        .bind(version)
        .bind(data)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All records, newest first.
    pub async fn list_all(&self) -> Result<Vec<FillRecord>, FormError> {
        let rows = sqlx::query(
            "SELECT id, filename, version, data, created_at FROM filled_forms ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| FillRecord {
                id: row.get("id"),
                filename: row.get::<Option<String>, _>("filename").unwrap_or_default(),
                version: row.get::<Option<String>, _>("version").unwrap_or_default(),
                data: row.get::<Option<String>, _>("data").unwrap_or_default(),
                created_at: row.get::<Option<String>, _>("created_at").unwrap_or_default(),
            })
            .collect())
    }
}

/// RFC 3339 UTC with millisecond precision; sorts lexicographically.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
