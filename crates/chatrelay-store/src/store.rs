//! Document store implementation.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use sled::{Db, Tree};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::feed::{Change, ChangeFeed, FeedRegistry};
use crate::query::Query;

/// Prefix for per-table trees.
const TABLE_PREFIX: &str = "table:";

/// Primary key field of every document.
pub const ID_FIELD: &str = "id";

/// JSON document store on top of sled, with live change feeds.
///
/// Writes and feed registration share one commit lock, so a feed opened with
/// an initial snapshot sees every later write exactly once.
pub struct Store {
    /// The underlying sled database.
    db: Db,

    /// Open change feeds.
    feeds: Arc<FeedRegistry>,

    /// Serializes commits with feed registration.
    commit: Mutex<()>,
}

impl Store {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let db = config.to_sled_config().open()?;
        if db.was_recovered() {
            tracing::info!(path = %config.path.display(), "store recovered from disk");
        }

        Ok(Self {
            db,
            feeds: Arc::new(FeedRegistry::new()),
            commit: Mutex::new(()),
        })
    }

    /// Open a temporary store, deleted on drop.
    pub fn temporary() -> Result<Self> {
        Self::open(StoreConfig::temporary())
    }

    fn tree(&self, table: &str) -> Result<Tree> {
        if table.is_empty() {
            return Err(Error::InvalidQuery("table name must not be empty".to_string()));
        }
        Ok(self.db.open_tree(format!("{TABLE_PREFIX}{table}"))?)
    }

    fn decode(bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Insert a new document and return its primary key.
    ///
    /// A UUID is generated when the document carries no `id`.
    pub fn insert(&self, table: &str, doc: Value) -> Result<String> {
        let Value::Object(mut fields) = doc else {
            return Err(Error::InvalidDocument("document must be a JSON object".to_string()));
        };

        let id = match fields.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => {
                return Err(Error::InvalidDocument(format!(
                    "primary key must be a non-empty string, got {other}"
                )));
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        let tree = self.tree(table)?;
        let doc = Value::Object(fields);
        let bytes = serde_json::to_vec(&doc)?;

        let _commit = self.commit.lock();
        if tree.contains_key(id.as_bytes())? {
            return Err(Error::DuplicateKey {
                table: table.to_string(),
                id,
            });
        }
        tree.insert(id.as_bytes(), bytes)?;
        self.feeds.publish(table, &Change::inserted(doc));

        tracing::debug!(table, id = %id, "document inserted");
        Ok(id)
    }

    /// Merge the fields of `patch` into an existing document.
    ///
    /// Returns `false` when no document has this id. The primary key is
    /// never changed by a patch.
    pub fn update(&self, table: &str, id: &str, patch: Value) -> Result<bool> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidDocument("patch must be a JSON object".to_string()));
        };

        let tree = self.tree(table)?;

        let _commit = self.commit.lock();
        let Some(bytes) = tree.get(id.as_bytes())? else {
            tracing::debug!(table, id, "update skipped, document not found");
            return Ok(false);
        };

        let old = Self::decode(&bytes)?;
        let mut fields = old.as_object().cloned().unwrap_or_else(Map::new);
        for (key, value) in patch {
            if key != ID_FIELD {
                fields.insert(key, value);
            }
        }
        let new = Value::Object(fields);

        if new == old {
            return Ok(true);
        }

        tree.insert(id.as_bytes(), serde_json::to_vec(&new)?)?;
        self.feeds.publish(
            table,
            &Change {
                old_val: Some(old),
                new_val: Some(new),
            },
        );

        tracing::debug!(table, id, "document updated");
        Ok(true)
    }

    /// Delete a document, returning it if it existed.
    pub fn delete(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let tree = self.tree(table)?;

        let _commit = self.commit.lock();
        let Some(bytes) = tree.remove(id.as_bytes())? else {
            return Ok(None);
        };

        let old = Self::decode(&bytes)?;
        self.feeds.publish(
            table,
            &Change {
                old_val: Some(old.clone()),
                new_val: None,
            },
        );

        tracing::debug!(table, id, "document deleted");
        Ok(Some(old))
    }

    /// Get a document by primary key.
    pub fn get(&self, table: &str, id: &str) -> Result<Option<Value>> {
        match self.tree(table)?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All documents of a table, in primary key order.
    pub fn scan(&self, table: &str) -> Result<Vec<Value>> {
        Self::scan_tree(&self.tree(table)?)
    }

    fn scan_tree(tree: &Tree) -> Result<Vec<Value>> {
        tree.iter()
            .values()
            .map(|result| Self::decode(&result?))
            .collect()
    }

    /// Number of documents in a table.
    pub fn count(&self, table: &str) -> Result<usize> {
        Ok(self.tree(table)?.len())
    }

    /// Open a live change feed for `query`.
    ///
    /// With `include_initial`, every matching document is delivered first as
    /// an insert, in the query's order.
    pub fn changes(&self, query: Query) -> Result<ChangeFeed> {
        query.validate()?;
        let tree = self.tree(&query.table)?;

        let _commit = self.commit.lock();
        let initial = if query.include_initial {
            let mut docs: Vec<Value> = Self::scan_tree(&tree)?
                .into_iter()
                .filter(|doc| query.matches(doc))
                .collect();
            query.sort(&mut docs);
            docs.into_iter().map(Change::inserted).collect()
        } else {
            VecDeque::new()
        };

        let (feed_id, rx) = self.feeds.register(query);
        Ok(ChangeFeed::new(feed_id, initial, rx, self.feeds.clone()))
    }

    /// Number of open change feeds.
    pub fn active_feeds(&self) -> usize {
        self.feeds.len()
    }

    /// Stop feeding every open change feed.
    ///
    /// Open feeds yield what they already received and then end.
    pub fn close_feeds(&self) {
        let _commit = self.commit.lock();
        let open = self.feeds.len();
        self.feeds.clear();
        tracing::info!(open, "change feeds closed");
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Thread-safe store handle.
pub type SharedStore = Arc<Store>;
