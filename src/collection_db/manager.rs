//! Per-store-id handles over the collection databases, plus the ingest
//! stamp persistence they share.

use super::store::CollectionDb;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Persistence for "when was this store last ingested" stamps, keyed by the
/// store's last-update key.
pub trait StampStore: Send + Sync {
    fn last_ingest(&self, key: &str) -> Option<i64>;
    fn set_last_ingest(&self, key: &str, timestamp_millis: i64);
}

/// Stamps held in a flat JSON object on disk.
pub struct JsonFileStampStore {
    path: PathBuf,
    stamps: Mutex<HashMap<String, i64>>,
}

impl JsonFileStampStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let stamps = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read stamp file {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse stamp file {:?}", path))?
        } else {
            HashMap::new()
        };
        Ok(JsonFileStampStore {
            path,
            stamps: Mutex::new(stamps),
        })
    }

    fn persist(&self, stamps: &HashMap<String, i64>) {
        let serialized = match serde_json::to_string_pretty(stamps) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Failed to serialize ingest stamps: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            warn!("Failed to write stamp file {:?}: {}", self.path, e);
        }
    }
}

impl StampStore for JsonFileStampStore {
    fn last_ingest(&self, key: &str) -> Option<i64> {
        self.stamps.lock().unwrap().get(key).copied()
    }

    fn set_last_ingest(&self, key: &str, timestamp_millis: i64) {
        let mut stamps = self.stamps.lock().unwrap();
        stamps.insert(key.to_string(), timestamp_millis);
        self.persist(&stamps);
    }
}

/// In-memory stamps, for tests.
#[derive(Default)]
pub struct MemoryStampStore {
    stamps: Mutex<HashMap<String, i64>>,
}

impl StampStore for MemoryStampStore {
    fn last_ingest(&self, key: &str) -> Option<i64> {
        self.stamps.lock().unwrap().get(key).copied()
    }

    fn set_last_ingest(&self, key: &str, timestamp_millis: i64) {
        self.stamps.lock().unwrap().insert(key.to_string(), timestamp_millis);
    }
}

/// Opens and caches one [`CollectionDb`] per store id. All stores live in
/// the same directory and share one stamp store.
pub struct CollectionDbManager {
    db_dir: PathBuf,
    read_pool_size: usize,
    stamps: Arc<dyn StampStore>,
    dbs: Mutex<HashMap<String, Arc<CollectionDb>>>,
}

impl CollectionDbManager {
    pub fn new(db_dir: PathBuf, read_pool_size: usize, stamps: Arc<dyn StampStore>) -> Self {
        CollectionDbManager {
            db_dir,
            read_pool_size,
            stamps,
            dbs: Mutex::new(HashMap::new()),
        }
    }

    pub fn stamps(&self) -> Arc<dyn StampStore> {
        self.stamps.clone()
    }

    /// The handle for `store_id`, opening its database file on first use.
    pub fn get_or_open(&self, store_id: &str) -> Result<Arc<CollectionDb>> {
        let mut dbs = self.dbs.lock().unwrap();
        if let Some(db) = dbs.get(store_id) {
            return Ok(db.clone());
        }
        std::fs::create_dir_all(&self.db_dir)
            .with_context(|| format!("Failed to create db directory {:?}", self.db_dir))?;
        let db = Arc::new(CollectionDb::open(
            &self.db_dir,
            store_id,
            self.read_pool_size,
            self.stamps.clone(),
        )?);
        dbs.insert(store_id.to_string(), db.clone());
        Ok(db)
    }
}
