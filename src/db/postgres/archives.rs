use std::ops::Range;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    archive::{ArchiveKind, ArchiveTableRef},
    db::{
        error::DbResult,
        query::{self, Dialect, Ident, Predicate, bind_values},
        repos::{ArchiveRow, ArchiveStore, ArchiveValue, ID_COLUMN},
    },
};

/// Archive storage on PostgreSQL.
///
/// Every statement goes to the primary: purge decisions read the same rows
/// they later delete, so a lagging replica would produce wrong estimates.
pub struct PostgresArchiveStore {
    write_pool: PgPool,
}

impl PostgresArchiveStore {
    pub fn new(write_pool: PgPool) -> Self {
        Self { write_pool }
    }

    fn quoted_list(tables: &[String]) -> DbResult<String> {
        let quoted = tables
            .iter()
            .map(|t| Ident::new(t).map(|i| i.quoted()))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }
}

#[async_trait]
impl ArchiveStore for PostgresArchiveStore {
    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT tablename::TEXT
            FROM pg_catalog.pg_tables
            WHERE schemaname = current_schema()
            ORDER BY tablename
            "#,
        )
        .fetch_all(&self.write_pool)
        .await?;
        Ok(tables)
    }

    async fn create_archive_table(&self, table: &ArchiveTableRef) -> DbResult<()> {
        let ident = Ident::new(&table.table_name)?;
        let index = Ident::new(&format!("{}_period_archived", table.table_name))?;
        let value_type = match table.kind {
            ArchiveKind::Numeric => "DOUBLE PRECISION",
            ArchiveKind::Blob => "BYTEA",
        };

        let mut tx = self.write_pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                idarchive BIGINT NOT NULL,
                name VARCHAR(255) NOT NULL,
                idsite BIGINT,
                date1 DATE,
                date2 DATE,
                period BIGINT,
                ts_archived TIMESTAMPTZ,
                value {value_type},
                PRIMARY KEY (idarchive, name)
            )
            "#,
            ident.quoted()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (period, ts_archived)",
            index.quoted(),
            ident.quoted()
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[ArchiveRow]) -> DbResult<u64> {
        let ident = Ident::new(table)?;
        let sql = format!(
            "INSERT INTO {} (idarchive, name, idsite, date1, date2, period, ts_archived, value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            ident.quoted()
        );
        let now = Utc::now();

        let mut tx = self.write_pool.begin().await?;
        let mut inserted = 0;
        for row in rows {
            let query = sqlx::query(&sql)
                .bind(row.idarchive)
                .bind(&row.name)
                .bind(row.idsite)
                .bind(row.date1)
                .bind(row.date2)
                .bind(row.period)
                .bind(now);
            let query = match &row.value {
                ArchiveValue::Numeric(v) => query.bind(*v),
                ArchiveValue::Blob(v) => query.bind(v.as_slice()),
            };
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn max_id(&self, table: &str, column: &str) -> DbResult<i64> {
        let sql = query::max_id(&Ident::new(table)?, &Ident::new(column)?);
        let max = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.write_pool)
            .await?;
        Ok(max)
    }

    async fn count_in_range(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        range: Range<i64>,
    ) -> DbResult<u64> {
        let rendered = query::count_in_range(
            Dialect::Postgres,
            &Ident::new(table)?,
            ID_COLUMN,
            filter,
            range,
        );
        let count: i64 = bind_values!(
            sqlx::query_scalar::<_, i64>(&rendered.sql),
            &rendered.values
        )
        .fetch_one(&self.write_pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_ids_in_range(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        range: Range<i64>,
    ) -> DbResult<Vec<i64>> {
        let rendered = query::fetch_ids_in_range(
            Dialect::Postgres,
            &Ident::new(table)?,
            ID_COLUMN,
            filter,
            range,
        );
        let ids = bind_values!(
            sqlx::query_scalar::<_, i64>(&rendered.sql),
            &rendered.values
        )
        .fetch_all(&self.write_pool)
        .await?;
        Ok(ids)
    }

    async fn delete_chunk(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        limit: u64,
    ) -> DbResult<u64> {
        let rendered = query::delete_chunk(
            Dialect::Postgres,
            &Ident::new(table)?,
            ID_COLUMN,
            filter,
            limit,
        );
        let result = bind_values!(sqlx::query(&rendered.sql), &rendered.values)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn drop_tables(&self, tables: &[String]) -> DbResult<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let list = Self::quoted_list(tables)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {list}"))
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn optimize_tables(&self, tables: &[String]) -> DbResult<()> {
        if tables.is_empty() {
            return Ok(());
        }
        // VACUUM cannot run inside a transaction block; the pool executes it
        // in autocommit mode.
        let list = Self::quoted_list(tables)?;
        sqlx::query(&format!("VACUUM ANALYZE {list}"))
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
