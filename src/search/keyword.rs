//! Keyword scoring for hybrid search.
//!
//! Conjunctive matching: every query term must hit at least one field
//! (AND across terms, OR across fields). Field weights favor title over
//! summary over body text over OCR text, and the final score is the mean of
//! per-term weights so it stays in [0, 1] for fusion with semantic scores.

use crate::items::ItemRecord;

const TITLE_WEIGHT: f32 = 1.0;
const SUMMARY_WEIGHT: f32 = 0.8;
const TEXT_WEIGHT: f32 = 0.6;
const OCR_WEIGHT: f32 = 0.4;

/// Shared with the interpreter's filler list in spirit, but scoped to
/// tokenization: words this common carry no keyword signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at", "to",
    "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so", "if", "then",
];

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub item_id: u64,
    pub score: f32,
}

/// Tokenize a query into lowercase terms, dropping stop words and terms of
/// length two or less.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.len() > 2 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Score records against query terms. Only records matched by every term
/// are returned, sorted by score descending.
pub fn search_keyword(records: &[ItemRecord], terms: &[String]) -> Vec<KeywordHit> {
    if terms.is_empty() {
        return vec![];
    }

    let mut hits: Vec<KeywordHit> = records
        .iter()
        .filter_map(|record| {
            score_record(record, terms).map(|score| KeywordHit {
                item_id: record.item.id,
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

/// Per-record score: mean over terms of the best field weight each term
/// matched. `None` when any term matches nothing.
fn score_record(record: &ItemRecord, terms: &[String]) -> Option<f32> {
    let title = record.item.title.to_lowercase();
    let summary = record.item.summary.to_lowercase();
    let text = record
        .content
        .text
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();
    let ocr = record
        .content
        .ocr_text
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();

    let mut total = 0.0f32;
    for term in terms {
        let mut best = 0.0f32;
        if title.contains(term.as_str()) {
            best = TITLE_WEIGHT;
        } else if summary.contains(term.as_str()) {
            best = SUMMARY_WEIGHT;
        } else if text.contains(term.as_str()) {
            best = TEXT_WEIGHT;
        } else if ocr.contains(term.as_str()) {
            best = OCR_WEIGHT;
        }

        if best == 0.0 {
            return None;
        }
        total += best;
    }

    Some(total / terms.len() as f32)
}
