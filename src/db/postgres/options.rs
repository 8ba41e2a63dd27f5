use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::{
    error::DbResult,
    query::{self, Dialect, Predicate, bind_values},
    repos::{OptionRecord, OptionRepo},
};

pub struct PostgresOptionRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresOptionRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> DbResult<OptionRecord> {
        Ok(OptionRecord {
            name: row.try_get("option_name")?,
            value: row.try_get("option_value")?,
            autoload: row.try_get("autoload")?,
        })
    }
}

#[async_trait]
impl OptionRepo for PostgresOptionRepo {
    async fn get(&self, name: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT option_value FROM options WHERE option_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.read_pool)
        .await?;
        Ok(value)
    }

    async fn get_many(&self, names: &[&str]) -> DbResult<HashMap<String, String>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let filter = Predicate::is_in("option_name", names.iter().copied());
        let clause = query::where_clause(Dialect::Postgres, Some(&filter));
        let sql = format!("SELECT option_name, option_value FROM options{}", clause.sql);

        let rows = bind_values!(sqlx::query(&sql), &clause.values)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter()
            .map(|row| -> DbResult<(String, String)> {
                Ok((row.try_get("option_name")?, row.try_get("option_value")?))
            })
            .collect()
    }

    async fn set(&self, name: &str, value: &str, autoload: bool) -> DbResult<()> {
        let mut tx = self.write_pool.begin().await?;

        // Lock the row (if any) so concurrent writers serialize on it.
        let exists = sqlx::query("SELECT 1 FROM options WHERE option_name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if exists {
            sqlx::query("UPDATE options SET option_value = $1 WHERE option_name = $2")
                .bind(value)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO options (option_name, option_value, autoload) VALUES ($1, $2, $3)",
            )
            .bind(name)
            .bind(value)
            .bind(autoload)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_all_autoload(&self) -> DbResult<Vec<OptionRecord>> {
        let rows = sqlx::query(
            "SELECT option_name, option_value, autoload FROM options \
             WHERE autoload ORDER BY option_name",
        )
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn fetch_all(&self) -> DbResult<Vec<OptionRecord>> {
        let rows = sqlx::query(
            "SELECT option_name, option_value, autoload FROM options ORDER BY option_name",
        )
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn delete(&self, name: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM options WHERE option_name = $1")
            .bind(name)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
