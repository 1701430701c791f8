//! CRUD facade over the `api_keys` table.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use keymux_types::{ApiKey, RegistryError};

/// Status filter for paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    Enabled,
    Disabled,
    #[default]
    All,
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "enabled" => Self::Enabled,
            "disabled" => Self::Disabled,
            _ => Self::All,
        }
    }
}

/// Narrow, transactional facade over the durable key store.
#[derive(Clone)]
pub struct KeyStore {
    pool: SqlitePool,
}

fn row_to_key(row: &SqliteRow) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        secret: row.get("secret"),
        enabled: row.get("enabled"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

impl KeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_enabled(&self) -> Result<Vec<ApiKey>, RegistryError> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        Ok(rows.iter().map(row_to_key).collect())
    }

    pub async fn list_disabled(&self) -> Result<Vec<ApiKey>, RegistryError> {
        let rows = sqlx::query("SELECT * FROM api_keys WHERE enabled = 0 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        Ok(rows.iter().map(row_to_key).collect())
    }

    pub async fn find(&self, id: i64) -> Result<ApiKey, RegistryError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        row.as_ref().map(row_to_key).ok_or(RegistryError::NotFound(id))
    }

    /// Idempotent enabled/disabled flip. Last writer wins under concurrency.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE api_keys SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    /// Demote a key, recording why. Failures are logged, not propagated:
    /// retirement is a best-effort side effect of request handling.
    pub async fn disable(&self, id: i64, reason: &str) {
        tracing::warn!("disabling key {}: {}", id, reason);
        if let Err(e) = self.set_enabled(id, false).await {
            tracing::error!("failed to disable key {}: {}", id, e);
        }
    }

    pub async fn count_by_status(&self) -> Result<(i64, i64), RegistryError> {
        let row = sqlx::query(
            "SELECT \
               COALESCE(SUM(CASE WHEN enabled = 1 THEN 1 ELSE 0 END), 0) AS enabled_count, \
               COALESCE(SUM(CASE WHEN enabled = 0 THEN 1 ELSE 0 END), 0) AS disabled_count \
             FROM api_keys",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(RegistryError::database)?;
        Ok((row.get("enabled_count"), row.get("disabled_count")))
    }

    /// Insert one credential, enabled by default.
    pub async fn add(&self, secret: &str) -> Result<ApiKey, RegistryError> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO api_keys (secret, enabled, created_at) VALUES (?, 1, ?)")
            .bind(secret)
            .bind(now)
            .execute(&self.pool)
            .await;
        match result {
            Ok(done) => Ok(ApiKey {
                id: done.last_insert_rowid(),
                secret: secret.to_string(),
                enabled: true,
                created_at: now,
            }),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                Err(RegistryError::Duplicate)
            }
            Err(e) => Err(RegistryError::database(e)),
        }
    }

    /// Bulk insert. Credentials already present are skipped; the registry
    /// ends up holding exactly the union.
    pub async fn add_many(&self, secrets: &[String]) -> Result<(usize, usize), RegistryError> {
        if secrets.is_empty() {
            return Ok((0, 0));
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(RegistryError::database)?;
        let mut added = 0usize;
        for secret in secrets {
            let done = sqlx::query(
                "INSERT OR IGNORE INTO api_keys (secret, enabled, created_at) VALUES (?, 1, ?)",
            )
            .bind(secret)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RegistryError::database)?;
            added += done.rows_affected() as usize;
        }
        tx.commit().await.map_err(RegistryError::database)?;
        Ok((added, secrets.len() - added))
    }

    pub async fn delete(&self, id: i64) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[i64]) -> Result<u64, RegistryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM api_keys WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await.map_err(RegistryError::database)?;
        Ok(result.rows_affected())
    }

    pub async fn delete_disabled(&self) -> Result<u64, RegistryError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE enabled = 0")
            .execute(&self.pool)
            .await
            .map_err(RegistryError::database)?;
        Ok(result.rows_affected())
    }

    /// Paginated listing for the admin UI, newest first.
    pub async fn list_paged(
        &self,
        page: u32,
        page_size: u32,
        filter: StatusFilter,
    ) -> Result<(Vec<ApiKey>, i64), RegistryError> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        // Widen before multiplying: client-supplied page numbers may
        // otherwise overflow u32; an out-of-range page is an empty page.
        let offset = i64::from(page - 1).saturating_mul(i64::from(page_size));
        let clause = match filter {
            StatusFilter::Enabled => "WHERE enabled = 1",
            StatusFilter::Disabled => "WHERE enabled = 0",
            StatusFilter::All => "",
        };

        let count_sql = format!("SELECT COUNT(*) AS n FROM api_keys {clause}");
        let total: i64 = sqlx::query(&count_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(RegistryError::database)?
            .get("n");

        let list_sql =
            format!("SELECT * FROM api_keys {clause} ORDER BY id DESC LIMIT ? OFFSET ?");
        let rows = sqlx::query(&list_sql)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(RegistryError::database)?;

        Ok((rows.iter().map(row_to_key).collect(), total))
    }
}
