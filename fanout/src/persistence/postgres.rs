use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::config::PersistenceConfig;
use crate::correlation::InvocationId;
use crate::item::{RawWorkItem, Selection};
use crate::source::{Page, PageCursor, WorkSource};
use crate::step::StepJournal;

/// Open a connection pool sized by `config`.
pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.connection_string)
        .await?;
    Ok(pool)
}

/// PostgreSQL-backed work source.
///
/// Reads `id`, `group_id` and `status` columns of a work item table,
/// ordered by `id` so offset paging is stable while the table is unchanged.
#[derive(Debug, Clone)]
pub struct PostgresWorkSource {
    pool: PgPool,
    table: String,
}

impl PostgresWorkSource {
    /// Work source over the `work_items` table.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: "work_items".to_string(),
        }
    }

    /// Read from `table` instead, which must be a plain or schema-qualified
    /// SQL identifier.
    pub fn with_table(mut self, table: impl Into<String>) -> anyhow::Result<Self> {
        let table = table.into();
        let valid = !table.is_empty()
            && table.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && !part.starts_with(|c: char| c.is_ascii_digit())
            });
        if !valid {
            anyhow::bail!("invalid table name: {table}");
        }
        self.table = table;
        Ok(self)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkSource for PostgresWorkSource {
    async fn fetch_page(
        &self,
        selection: &Selection,
        cursor: PageCursor,
        page_size: usize,
    ) -> anyhow::Result<Page> {
        let limit = i64::try_from(page_size)?;
        let offset = i64::try_from(cursor.offset())?;

        // One extra row tells us whether another page exists.
        let query = format!(
            r#"
            SELECT id::text AS id, group_id::text AS group_id
            FROM {}
            WHERE status = $1
              AND (cardinality($2::text[]) = 0 OR group_id::text = ANY($2::text[]))
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
            self.table
        );
        let rows = sqlx::query(&query)
            .bind(selection.status.as_str())
            .bind(&selection.groups)
            .bind(limit + 1)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let has_more = rows.len() > page_size;
        let mut items = Vec::with_capacity(rows.len().min(page_size));
        for row in rows.into_iter().take(page_size) {
            items.push(RawWorkItem {
                id: row.try_get("id")?,
                group_id: row.try_get("group_id")?,
            });
        }

        debug!(
            offset = cursor.offset(),
            fetched = items.len(),
            has_more,
            "fetched work items page"
        );
        Ok(Page::new(items, has_more))
    }
}

/// PostgreSQL-backed step journal.
///
/// Completed steps are rows keyed by `(invocation_id, step)`; the first
/// recorded output for a key wins.
#[derive(Debug, Clone)]
pub struct PostgresStepJournal {
    pool: PgPool,
}

impl PostgresStepJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the journal table if it does not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fanout_step_journal (
                invocation_id TEXT NOT NULL,
                step TEXT NOT NULL,
                output JSONB NOT NULL,
                completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (invocation_id, step)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete every recorded step of an invocation.
    pub async fn forget(&self, invocation: &InvocationId) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM fanout_step_journal WHERE invocation_id = $1")
            .bind(invocation.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StepJournal for PostgresStepJournal {
    async fn load(
        &self,
        invocation: &InvocationId,
        step: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            r#"
            SELECT output
            FROM fanout_step_journal
            WHERE invocation_id = $1 AND step = $2
            "#,
        )
        .bind(invocation.as_str())
        .bind(step)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("output")?)),
            None => Ok(None),
        }
    }

    async fn record(
        &self,
        invocation: &InvocationId,
        step: &str,
        output: serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fanout_step_journal (invocation_id, step, output)
            VALUES ($1, $2, $3)
            ON CONFLICT (invocation_id, step) DO NOTHING
            "#,
        )
        .bind(invocation.as_str())
        .bind(step)
        .bind(&output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
