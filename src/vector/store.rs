//! Shared, persisted wrapper around the vector index.
//!
//! The worker writes and the search engine reads through the same
//! `VectorStore`; the inner `RwLock` guarantees a reader never observes a
//! half-written vector. The index is persisted as a JSON dump through the
//! storage layer, tagged with a fingerprint of the embedding route so a
//! model change invalidates stored vectors instead of mixing dimensions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::eid::Eid;
use crate::errors::EnrichError;
use crate::storage::StorageManager;
use crate::vector::index::{VectorHit, VectorIndex, VectorRecord};

const VECTORS_DUMP: &str = "vectors.json";
const DUMP_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct VectorDump {
    version: u32,
    fingerprint: String,
    dimensions: usize,
    records: Vec<VectorRecord>,
}

pub struct VectorStore {
    index: RwLock<VectorIndex>,
    storage: Arc<dyn StorageManager>,
    fingerprint: String,
}

impl VectorStore {
    /// Load the persisted index, or start fresh when the dump is missing,
    /// unreadable, or was written for a different embedding route.
    pub fn load(
        storage: Arc<dyn StorageManager>,
        dimensions: usize,
        fingerprint: &str,
    ) -> Self {
        let index = if storage.exists(VECTORS_DUMP) {
            match Self::read_dump(&storage, dimensions, fingerprint) {
                Ok(index) => {
                    log::info!("loaded {} vectors from storage", index.count());
                    index
                }
                Err(reason) => {
                    log::warn!("discarding stored vectors: {reason}");
                    VectorIndex::new(dimensions)
                }
            }
        } else {
            VectorIndex::new(dimensions)
        };

        Self {
            index: RwLock::new(index),
            storage,
            fingerprint: fingerprint.to_string(),
        }
    }

    fn read_dump(
        storage: &Arc<dyn StorageManager>,
        dimensions: usize,
        fingerprint: &str,
    ) -> Result<VectorIndex, String> {
        let data = storage
            .read(VECTORS_DUMP)
            .map_err(|e| format!("read failed: {e}"))?;
        let dump: VectorDump =
            serde_json::from_slice(&data).map_err(|e| format!("malformed dump: {e}"))?;

        if dump.version != DUMP_VERSION {
            return Err(format!("unsupported dump version {}", dump.version));
        }
        if dump.fingerprint != fingerprint {
            return Err("embedding route changed".to_string());
        }
        if dump.dimensions != dimensions {
            return Err(format!(
                "dimensions changed: stored {}, active {}",
                dump.dimensions, dimensions
            ));
        }

        let mut index = VectorIndex::new(dimensions);
        index
            .bulk_load(dump.records)
            .map_err(|e| format!("corrupt record: {e}"))?;
        Ok(index)
    }

    fn save(&self, index: &VectorIndex) {
        let dump = VectorDump {
            version: DUMP_VERSION,
            fingerprint: self.fingerprint.clone(),
            dimensions: index.dimensions(),
            records: index.records().to_vec(),
        };

        match serde_json::to_vec(&dump) {
            Ok(data) => {
                if let Err(e) = self.storage.write(VECTORS_DUMP, &data) {
                    log::error!("failed to persist vectors: {e}");
                }
            }
            Err(e) => log::error!("failed to serialize vectors: {e}"),
        }
    }

    pub fn count(&self) -> usize {
        self.index.read().unwrap().count()
    }

    pub fn upsert(
        &self,
        id: Eid,
        item_id: u64,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), EnrichError> {
        let mut index = self.index.write().unwrap();
        index.upsert(id, item_id, vector, metadata)?;
        self.save(&index);
        Ok(())
    }

    pub fn delete(&self, id: &Eid) -> bool {
        let mut index = self.index.write().unwrap();
        let removed = index.delete(id).is_some();
        if removed {
            self.save(&index);
        }
        removed
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, EnrichError> {
        self.index.read().unwrap().search(query, k)
    }
}
