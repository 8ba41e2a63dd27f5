use std::ops::Range;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    archive::{ArchiveKind, ArchiveTableRef},
    db::{
        error::DbResult,
        query::{self, Dialect, Ident, Predicate, bind_values},
        repos::{ArchiveRow, ArchiveStore, ArchiveValue, ID_COLUMN},
    },
};

pub struct SqliteArchiveStore {
    pool: SqlitePool,
}

impl SqliteArchiveStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchiveStore {
    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    async fn create_archive_table(&self, table: &ArchiveTableRef) -> DbResult<()> {
        let ident = Ident::new(&table.table_name)?;
        let index = Ident::new(&format!("{}_period_archived", table.table_name))?;
        let value_type = match table.kind {
            ArchiveKind::Numeric => "REAL",
            ArchiveKind::Blob => "BLOB",
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                idarchive INTEGER NOT NULL,
                name TEXT NOT NULL,
                idsite INTEGER,
                date1 TEXT,
                date2 TEXT,
                period INTEGER,
                ts_archived TEXT,
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ident.quoted()
        );
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
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
            .fetch_one(&self.pool)
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
            Dialect::Sqlite,
            &Ident::new(table)?,
            ID_COLUMN,
            filter,
            range,
        );
        let count: i64 = bind_values!(
            sqlx::query_scalar::<_, i64>(&rendered.sql),
            &rendered.values
        )
        .fetch_one(&self.pool)
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
            Dialect::Sqlite,
            &Ident::new(table)?,
            ID_COLUMN,
            filter,
            range,
        );
        let ids = bind_values!(
            sqlx::query_scalar::<_, i64>(&rendered.sql),
            &rendered.values
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_chunk(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        limit: u64,
    ) -> DbResult<u64> {
        let rendered =
            query::delete_chunk(Dialect::Sqlite, &Ident::new(table)?, ID_COLUMN, filter, limit);
        let result = bind_values!(sqlx::query(&rendered.sql), &rendered.values)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn drop_tables(&self, tables: &[String]) -> DbResult<()> {
        for table in tables {
            let ident = Ident::new(table)?;
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", ident.quoted()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn optimize_tables(&self, tables: &[String]) -> DbResult<()> {
        if tables.is_empty() {
            return Ok(());
        }
        // SQLite reclaims free pages per database file, not per table.
        sqlx::query("VACUUM").execute(&self.pool).await?;
        for table in tables {
            let ident = Ident::new(table)?;
            sqlx::query(&format!("ANALYZE {}", ident.quoted()))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
