//! Client-side cache of subscribed rows.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::TableRows;

/// Key of the single row in the `config` table.
pub const CONFIG_ROW_ID: u32 = 0;

/// A row type the cache knows how to decode and index.
pub trait TableRow: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    const TABLE_NAME: &'static str;
    type Key: Ord + Clone + fmt::Debug + Send + Sync;

    fn primary_key(&self) -> Self::Key;
}

/// Global arena parameters, maintained by the server module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub id: u32,
    pub world_size: u64,
}

impl TableRow for Config {
    const TABLE_NAME: &'static str = "config";
    type Key = u32;

    fn primary_key(&self) -> u32 {
        self.id
    }
}

/// Rows of one table, keyed by primary key.
pub struct TableCache<R: TableRow> {
    rows: RwLock<BTreeMap<R::Key, R>>,
}

impl<R: TableRow> Default for TableCache<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R: TableRow> TableCache<R> {
    pub fn find(&self, key: &R::Key) -> Option<R> {
        self.rows.read().get(key).cloned()
    }

    pub fn count(&self) -> usize {
        self.rows.read().len()
    }

    pub fn iter(&self) -> Vec<R> {
        self.rows.read().values().cloned().collect()
    }

    /// Decode and upsert rows. Rows that fail to decode are skipped.
    fn insert_json(&self, rows: &[serde_json::Value]) -> usize {
        let mut table = self.rows.write();
        let mut inserted = 0;
        for raw in rows {
            match serde_json::from_value::<R>(raw.clone()) {
                Ok(row) => {
                    table.insert(row.primary_key(), row);
                    inserted += 1;
                }
                Err(e) => {
                    tracing::warn!(table = R::TABLE_NAME, error = %e, "skipping undecodable row");
                }
            }
        }
        inserted
    }
}

/// Every table this client models.
#[derive(Default)]
pub struct RemoteTables {
    config: TableCache<Config>,
}

impl RemoteTables {
    pub fn config(&self) -> &TableCache<Config> {
        &self.config
    }

    pub(crate) fn apply(&self, tables: &[TableRows]) {
        for table in tables {
            if table.table_name == Config::TABLE_NAME {
                let n = self.config.insert_json(&table.rows);
                tracing::debug!(table = Config::TABLE_NAME, rows = n, "applied rows");
            } else {
                tracing::debug!(
                    table = %table.table_name,
                    rows = table.rows.len(),
                    "ignoring unmodelled table"
                );
            }
        }
    }
}

impl fmt::Debug for RemoteTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTables")
            .field("config", &self.config.count())
            .finish()
    }
}
