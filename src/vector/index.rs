//! In-memory vector index with cosine similarity search.
//!
//! Stores item embeddings and provides k-nearest search. The dimension is
//! fixed for the lifetime of the index; any mismatch fails fast rather than
//! silently truncating.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::eid::Eid;
use crate::errors::EnrichError;

/// A record in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Eid,
    pub item_id: u64,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Search hit, ordered by descending cosine similarity. Ties keep insertion
/// order; callers must not depend on an ordering among exact ties.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: Eid,
    pub item_id: u64,
    pub score: f32,
}

/// In-process nearest-neighbor store over embedding vectors.
///
/// This is a deliberate seam: any implementation exposing upsert/search/
/// delete/count satisfies callers, so a disk-backed or sharded index can
/// replace it without touching the worker or the search engine.
pub struct VectorIndex {
    records: Vec<VectorRecord>,
    by_id: HashMap<Eid, usize>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, id: &Eid) -> Option<&VectorRecord> {
        self.by_id.get(id).map(|idx| &self.records[*idx])
    }

    /// Insert or replace a record.
    pub fn upsert(
        &mut self,
        id: Eid,
        item_id: u64,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), EnrichError> {
        if vector.len() != self.dimensions {
            return Err(EnrichError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let record = VectorRecord {
            id: id.clone(),
            item_id,
            vector,
            metadata,
        };

        match self.by_id.get(&id) {
            Some(idx) => self.records[*idx] = record,
            None => {
                self.by_id.insert(id, self.records.len());
                self.records.push(record);
            }
        }

        Ok(())
    }

    pub fn delete(&mut self, id: &Eid) -> Option<VectorRecord> {
        let idx = self.by_id.remove(id)?;
        let removed = self.records.remove(idx);
        // indices after the removal point shift down by one
        for stored in self.by_id.values_mut() {
            if *stored > idx {
                *stored -= 1;
            }
        }
        Some(removed)
    }

    /// k-nearest search by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, EnrichError> {
        if query.len() != self.dimensions {
            return Err(EnrichError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);

        let mut hits: Vec<VectorHit> = self
            .records
            .iter()
            .map(|record| VectorHit {
                id: record.id.clone(),
                item_id: record.item_id,
                score: cosine_similarity(query, &record.vector, query_norm),
            })
            .collect();

        // stable sort keeps insertion order among exact ties
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        Ok(hits)
    }

    /// Bulk load records, used when restoring from a dump.
    pub fn bulk_load(&mut self, records: Vec<VectorRecord>) -> Result<(), EnrichError> {
        for record in records {
            self.upsert(record.id, record.item_id, record.vector, record.metadata)?;
        }
        Ok(())
    }

    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with a precomputed query norm.
/// Returns 0.0 when either norm is zero (defined, not an error).
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm < f32::EPSILON || target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot / (query_norm * target_norm)
}

/// Cosine similarity of two equal-length vectors.
#[cfg(test)]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b, l2_norm(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> Eid {
        Eid::from(s)
    }

    fn upsert(index: &mut VectorIndex, id: &str, item_id: u64, vector: Vec<f32>) {
        index
            .upsert(eid(id), item_id, vector, HashMap::new())
            .unwrap();
    }

    #[test]
    fn test_cosine_identity() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine(&v, &zero), 0.0);
        assert_eq!(cosine(&zero, &v), 0.0);
        assert_eq!(cosine(&zero, &zero), 0.0);
    }

    #[test]
    fn test_upsert_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let result = index.upsert(eid("a"), 1, vec![1.0, 0.0], HashMap::new());
        assert!(matches!(
            result,
            Err(EnrichError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        upsert(&mut index, "a", 1, vec![1.0, 0.0, 0.0]);

        let result = index.search(&[1.0, 0.0], 5);
        assert!(matches!(
            result,
            Err(EnrichError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let mut index = VectorIndex::new(3);
        upsert(&mut index, "a", 1, vec![1.0, 0.0, 0.0]);
        upsert(&mut index, "a", 1, vec![0.0, 1.0, 0.0]);

        assert_eq!(index.count(), 1);
        assert_eq!(index.get(&eid("a")).unwrap().vector, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_exact_match_scores_first() {
        let mut index = VectorIndex::new(3);
        upsert(&mut index, "a", 1, vec![1.0, 2.0, 3.0]);

        let hits = index.search(&[1.0, 2.0, 3.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_ordering_and_truncation() {
        let mut index = VectorIndex::new(2);
        upsert(&mut index, "far", 1, vec![0.0, 1.0]);
        upsert(&mut index, "near", 2, vec![1.0, 0.1]);
        upsert(&mut index, "exact", 3, vec![1.0, 0.0]);

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item_id, 3);
        assert_eq!(hits[1].item_id, 2);
    }

    #[test]
    fn test_delete() {
        let mut index = VectorIndex::new(2);
        upsert(&mut index, "a", 1, vec![1.0, 0.0]);
        upsert(&mut index, "b", 2, vec![0.0, 1.0]);

        assert!(index.delete(&eid("a")).is_some());
        assert_eq!(index.count(), 1);
        assert!(index.get(&eid("a")).is_none());
        // remaining record still addressable after index shift
        assert_eq!(index.get(&eid("b")).unwrap().item_id, 2);
        assert!(index.delete(&eid("a")).is_none());
    }

    #[test]
    fn test_zero_norm_record_scores_zero_not_error() {
        let mut index = VectorIndex::new(2);
        upsert(&mut index, "zero", 1, vec![0.0, 0.0]);
        upsert(&mut index, "real", 2, vec![1.0, 0.0]);

        let hits = index.search(&[1.0, 0.0], 5).unwrap();
        assert_eq!(hits[0].item_id, 2);
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn test_bulk_load() {
        let mut index = VectorIndex::new(2);
        index
            .bulk_load(vec![
                VectorRecord {
                    id: eid("a"),
                    item_id: 1,
                    vector: vec![1.0, 0.0],
                    metadata: HashMap::new(),
                },
                VectorRecord {
                    id: eid("b"),
                    item_id: 2,
                    vector: vec![0.0, 1.0],
                    metadata: HashMap::new(),
                },
            ])
            .unwrap();
        assert_eq!(index.count(), 2);
    }
}
