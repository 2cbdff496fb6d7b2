//! Hybrid search: semantic and keyword retrieval fused into one ranking.
//!
//! The two paths run concurrently and settle independently; a failed
//! semantic path (no provider, empty index) degrades to keyword-only
//! results instead of failing the search. When both paths come up empty but
//! a kind was detected, the engine falls back to browsing that kind: a user
//! who typed "images" wants to browse, not an empty result.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::ai::AiAdapter;
use crate::errors::EnrichError;
use crate::items::{Item, ItemRecord, ItemStore};
use crate::search::interpret::{interpret, Interpretation};
use crate::search::keyword::{search_keyword, tokenize};
use crate::vector::VectorStore;

/// Weight of the semantic score when an item is found by both paths.
const SEMANTIC_WEIGHT: f32 = 0.7;
/// Weight of the keyword score when an item is found by both paths.
const KEYWORD_WEIGHT: f32 = 0.3;
/// Semantic candidates fetched per requested result.
const CANDIDATE_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Semantic,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item: Item,
    pub score: f32,
    pub source: MatchSource,
}

pub struct HybridSearchEngine {
    store: Arc<dyn ItemStore>,
    vectors: Arc<VectorStore>,
    ai: Arc<AiAdapter>,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<dyn ItemStore>,
        vectors: Arc<VectorStore>,
        ai: Arc<AiAdapter>,
    ) -> Self {
        Self { store, vectors, ai }
    }

    pub fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let interp = interpret(query);
        let records = self.store.list()?;

        let (semantic_out, keyword_out) = std::thread::scope(|s| {
            let semantic = s.spawn(|| {
                self.semantic_branch(query, &interp, &records, limit, min_score)
            });
            let keyword = s.spawn(|| self.keyword_branch(query, &interp, &records));
            (semantic.join(), keyword.join())
        });

        // semantic is allowed to degrade; keyword is pure and only fails on
        // a panicked branch
        let semantic = match semantic_out {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                log::debug!("semantic search degraded: {e}");
                vec![]
            }
            Err(_) => {
                log::error!("semantic branch panicked");
                vec![]
            }
        };
        let keyword = match keyword_out {
            Ok(hits) => hits,
            Err(_) => {
                log::error!("keyword branch panicked");
                vec![]
            }
        };

        let mut results = merge(&records, semantic, keyword);
        results.truncate(limit);

        if results.is_empty() {
            if let Some(kind) = interp.kind {
                return Ok(browse_kind(&records, kind, limit));
            }
        }

        Ok(results)
    }

    /// Embed a statement-normalized form of the *original* query (kind
    /// words carry useful semantic signal) and rank index candidates.
    fn semantic_branch(
        &self,
        query: &str,
        interp: &Interpretation,
        records: &[ItemRecord],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<(u64, f32)>, EnrichError> {
        let rewritten = normalize_question(query);
        let vector = self.ai.embed(&rewritten)?;
        let hits = self
            .vectors
            .search(&vector, limit.max(1) * CANDIDATE_FACTOR)?;

        let by_id: HashMap<u64, &ItemRecord> =
            records.iter().map(|r| (r.item.id, r)).collect();

        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= min_score)
            .filter_map(|hit| by_id.get(&hit.item_id).map(|record| (hit, record)))
            .filter(|(_, record)| interp.kind.map_or(true, |k| k.matches(record)))
            .map(|(hit, _)| (hit.item_id, hit.score))
            .collect())
    }

    /// Conjunctive keyword match over the cleaned query (or the full
    /// original when cleaning stripped everything).
    fn keyword_branch(
        &self,
        query: &str,
        interp: &Interpretation,
        records: &[ItemRecord],
    ) -> Vec<(u64, f32)> {
        let source = if interp.cleaned.is_empty() {
            query
        } else {
            interp.cleaned.as_str()
        };
        let terms = tokenize(source);

        let by_id: HashMap<u64, &ItemRecord> =
            records.iter().map(|r| (r.item.id, r)).collect();

        search_keyword(records, &terms)
            .into_iter()
            .filter(|hit| {
                interp.kind.map_or(true, |k| {
                    by_id.get(&hit.item_id).is_some_and(|r| k.matches(r))
                })
            })
            .map(|hit| (hit.item_id, hit.score))
            .collect()
    }
}

/// Fuse the two rankings. Items found by both paths get the weighted hybrid
/// score; single-path items keep that path's score.
fn merge(
    records: &[ItemRecord],
    semantic: Vec<(u64, f32)>,
    keyword: Vec<(u64, f32)>,
) -> Vec<SearchResult> {
    let mut scores: HashMap<u64, (Option<f32>, Option<f32>)> = HashMap::new();

    for (id, score) in semantic {
        scores.entry(id).or_default().0 = Some(score);
    }
    for (id, score) in keyword {
        scores.entry(id).or_default().1 = Some(score);
    }

    let by_id: HashMap<u64, &ItemRecord> = records.iter().map(|r| (r.item.id, r)).collect();

    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .filter_map(|(id, entry)| {
            let record = by_id.get(&id)?;
            let (score, source) = match entry {
                (Some(sem), Some(kw)) => {
                    (SEMANTIC_WEIGHT * sem + KEYWORD_WEIGHT * kw, MatchSource::Hybrid)
                }
                (Some(sem), None) => (sem, MatchSource::Semantic),
                (None, Some(kw)) => (kw, MatchSource::Keyword),
                (None, None) => return None,
            };
            Some(SearchResult {
                item: record.item.clone(),
                score,
                source,
            })
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Kind-only browse fallback: every item of the detected kind, newest
/// first, with a flat score.
fn browse_kind(
    records: &[ItemRecord],
    kind: crate::search::interpret::KindFilter,
    limit: usize,
) -> Vec<SearchResult> {
    let mut matching: Vec<&ItemRecord> = records.iter().filter(|r| kind.matches(r)).collect();
    matching.sort_by(|a, b| b.item.created_at.cmp(&a.item.created_at));

    matching
        .into_iter()
        .take(limit)
        .map(|record| SearchResult {
            item: record.item.clone(),
            score: 0.0,
            source: MatchSource::Keyword,
        })
        .collect()
}

/// Light question-to-statement rewrite ("how to X" → "X tutorial guide").
fn normalize_question(query: &str) -> String {
    const REWRITES: &[(&str, &str)] = &[
        ("how to ", " tutorial guide"),
        ("how do i ", " tutorial guide"),
        ("how can i ", " tutorial guide"),
        ("what is ", " explanation"),
        ("what are ", " explanation"),
    ];

    let lower = query.trim().trim_end_matches('?').to_lowercase();
    for (prefix, suffix) in REWRITES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return format!("{rest}{suffix}");
            }
        }
    }
    lower
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::routes::ProviderBackend;
    use crate::ai::test_support::StubBackend;
    use crate::items::{
        BackendJson, ContentPatch, ItemCreate, ItemKind, ItemPatch, ItemStatus, Media, MediaType,
    };
    use crate::storage::{BackendLocal, StorageManager};
    use crate::eid::Eid;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<dyn ItemStore>,
        vectors: Arc<VectorStore>,
        engine: HybridSearchEngine,
    }

    fn harness(ai: AiAdapter) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageManager> =
            Arc::new(BackendLocal::new(dir.path().to_str().unwrap()).unwrap());
        let store: Arc<dyn ItemStore> = Arc::new(BackendJson::load(storage.clone()).unwrap());
        let ai = Arc::new(ai);
        let vectors = Arc::new(VectorStore::load(storage, 3, "test-route"));
        let engine = HybridSearchEngine::new(store.clone(), vectors.clone(), ai);

        Harness {
            _dir: dir,
            store,
            vectors,
            engine,
        }
    }

    /// Adapter whose every embed call returns the unit x-axis vector.
    fn embedding_ai() -> AiAdapter {
        let mut backend = StubBackend::ok(ProviderBackend::Local);
        backend.embed_reply = Ok(vec![1.0, 0.0, 0.0]);
        AiAdapter::new(Some(Box::new(backend)), None)
    }

    fn add_text_item(h: &Harness, title: &str, text: &str) -> u64 {
        let item = h
            .store
            .create(ItemCreate {
                kind: ItemKind::Text,
                title: title.to_string(),
                source_url: None,
            })
            .unwrap();
        h.store
            .upsert_content(
                item.id,
                ContentPatch {
                    text: Some(text.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        item.id
    }

    fn add_image_item(h: &Harness, title: &str) -> u64 {
        let item = h
            .store
            .create(ItemCreate {
                kind: ItemKind::File,
                title: title.to_string(),
                source_url: None,
            })
            .unwrap();
        h.store
            .add_media(
                item.id,
                Media {
                    url: format!("asset-{}", item.id),
                    media_type: MediaType::Image,
                    width: None,
                    height: None,
                },
            )
            .unwrap();
        item.id
    }

    fn index_vector(h: &Harness, item_id: u64, vector: Vec<f32>) {
        h.vectors
            .upsert(Eid::new(), item_id, vector, HashMap::new())
            .unwrap();
    }

    #[test]
    fn test_hybrid_score_weights() {
        let h = harness(embedding_ai());

        // keyword score 0.9: one term in title, one in summary
        let id = add_text_item(&h, "tokio runtime", "");
        h.store
            .update(
                id,
                ItemPatch {
                    summary: Some("async patterns".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        // semantic score 0.6 against the stub query vector [1, 0, 0]
        index_vector(&h, id, vec![0.6, 0.8, 0.0]);

        let results = h.engine.search("tokio async", 10, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, MatchSource::Hybrid);
        // 0.7 × 0.6 + 0.3 × 0.9
        assert!((results[0].score - 0.69).abs() < 1e-4);
    }

    #[test]
    fn test_semantic_only_keeps_score_and_source() {
        let h = harness(embedding_ai());
        let id = add_text_item(&h, "unrelated words", "nothing matching here");
        index_vector(&h, id, vec![1.0, 0.0, 0.0]);

        let results = h.engine.search("completely different", 10, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, MatchSource::Semantic);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_keyword_only_when_no_provider() {
        let h = harness(AiAdapter::disabled());
        add_text_item(&h, "postgres tuning", "vacuum and indexes");

        let results = h.engine.search("postgres", 10, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, MatchSource::Keyword);
    }

    #[test]
    fn test_min_score_filters_semantic_candidates() {
        let h = harness(embedding_ai());
        let id = add_text_item(&h, "zzz", "yyy");
        index_vector(&h, id, vec![0.3, 0.954, 0.0]);

        let results = h.engine.search("qqq", 10, 0.5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_kind_filter_scopes_both_paths() {
        let h = harness(embedding_ai());
        let note = add_text_item(&h, "dog training notes", "sit stay fetch");
        let image = add_image_item(&h, "dog photo");
        index_vector(&h, note, vec![1.0, 0.0, 0.0]);
        index_vector(&h, image, vec![1.0, 0.0, 0.0]);

        let results = h.engine.search("images with dog", 10, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id, image);
    }

    #[test]
    fn test_kind_browse_fallback_returns_all_of_kind() {
        let h = harness(AiAdapter::disabled());
        add_image_item(&h, "sunset");
        add_image_item(&h, "mountain");
        add_image_item(&h, "lake");
        add_text_item(&h, "note", "text");

        // both search paths come up empty for the bare kind query
        let results = h.engine.search("images", 10, 0.0).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn test_no_kind_and_no_match_is_empty() {
        let h = harness(AiAdapter::disabled());
        add_text_item(&h, "note", "text");

        let results = h.engine.search("quantum chromodynamics", 10, 0.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_failed_items_are_still_searchable() {
        let h = harness(AiAdapter::disabled());
        let id = add_text_item(&h, "broken capture", "partial but useful text");
        h.store
            .update(
                id,
                ItemPatch {
                    status: Some(ItemStatus::Failed),
                    ..Default::default()
                },
            )
            .unwrap();

        let results = h.engine.search("partial useful", 10, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.status, ItemStatus::Failed);
    }

    #[test]
    fn test_limit_truncates_ranking() {
        let h = harness(AiAdapter::disabled());
        for i in 0..5 {
            add_text_item(&h, &format!("rust note {i}"), "rust content");
        }

        let results = h.engine.search("rust", 2, 0.0).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_normalize_question_rewrites() {
        assert_eq!(
            normalize_question("how to deploy kubernetes?"),
            "deploy kubernetes tutorial guide"
        );
        assert_eq!(
            normalize_question("What is a monad"),
            "a monad explanation"
        );
        assert_eq!(normalize_question("dog photos"), "dog photos");
    }

    #[test]
    fn test_deleted_item_vector_is_ignored() {
        let h = harness(embedding_ai());
        // vector present for an item that no longer exists in the store
        index_vector(&h, 999, vec![1.0, 0.0, 0.0]);

        let results = h.engine.search("anything", 10, 0.0).unwrap();
        assert!(results.is_empty());
    }
}
