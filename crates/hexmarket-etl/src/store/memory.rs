//! In-process table store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{Row, StoreError, Table, TableStore};

/// Tables held as immutable snapshots behind a lock; a replace swaps the
/// snapshot pointer
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Arc<Vec<Row>>>>,
    locked: AtomicBool,
    failing: Mutex<HashSet<Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of `table`
    pub async fn snapshot(&self, table: Table) -> Arc<Vec<Row>> {
        self.tables
            .read()
            .await
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every later replace of `table` fail after building the new rows
    pub async fn fail_writes_to(&self, table: Table) {
        self.failing.lock().await.insert(table);
    }

    pub async fn heal(&self, table: Table) {
        self.failing.lock().await.remove(&table);
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn try_lock_run(&self) -> Result<bool, StoreError> {
        Ok(self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn unlock_run(&self) -> Result<(), StoreError> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    async fn replace_table(&self, table: Table, rows: Vec<Row>) -> Result<u64, StoreError> {
        let written = rows.len() as u64;
        let staged = Arc::new(rows);

        if self.failing.lock().await.contains(&table) {
            return Err(StoreError::Write {
                table,
                message: "simulated write failure".to_string(),
            });
        }

        self.tables.write().await.insert(table, staged);
        Ok(written)
    }

    async fn row_count(&self, table: Table) -> Result<u64, StoreError> {
        Ok(self.snapshot(table).await.len() as u64)
    }
}
