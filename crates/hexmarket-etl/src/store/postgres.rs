//! PostgreSQL table store

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Row, StoreError, Table, TableStore, Value};
use crate::config::StoreConfig;

/// Advisory lock key shared by every pipeline process
const RUN_LOCK_KEY: i64 = 0x6865_786d_6b74;

pub struct PgStore {
    pool: PgPool,
    batch_size: usize,
    /// Connection holding the session-level advisory lock while a run is active
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        info!(max_connections = config.max_connections, "Database connection pool established");
        Ok(Self::from_pool(pool, config.load_batch_size))
    }

    pub fn from_pool(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            lock_conn: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn try_lock_run(&self) -> Result<bool, StoreError> {
        let mut held = self.lock_conn.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn unlock_run(&self) -> Result<(), StoreError> {
        if let Some(mut conn) = self.lock_conn.lock().await.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(RUN_LOCK_KEY)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn replace_table(&self, table: Table, rows: Vec<Row>) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&format!("DELETE FROM {}", table.name()))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let insert = format!("INSERT INTO {} ({}) ", table.name(), table.columns().join(", "));
        let mut written = 0;
        for batch in rows.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert);
            query_builder.push_values(batch, |mut b, row| {
                for value in row {
                    match value {
                        Value::Int(v) => b.push_bind(*v),
                        Value::Float(v) => b.push_bind(*v),
                        Value::Text(v) => b.push_bind(v.clone()),
                        Value::Date(v) => b.push_bind(*v),
                    };
                }
            });
            written += query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        // Dropping `tx` on any error above rolls back, leaving the old rows
        tx.commit().await?;
        debug!(table = %table, deleted, written, "Committed table replace");
        Ok(written)
    }

    async fn row_count(&self, table: Table) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
