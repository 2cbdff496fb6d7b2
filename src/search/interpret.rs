//! Lexical query interpretation.
//!
//! Detects a content-kind filter from a free-text query and strips the
//! matched keywords plus filler words to a residual query. Detection is an
//! ordered table evaluated first-match-wins: image before link before note
//! before file before todo, so overlapping vocabularies resolve
//! deterministically.

use crate::items::{ItemKind, ItemRecord};

/// Content-kind constraint inferred from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Image,
    Link,
    Note,
    File,
    Todo,
}

impl KindFilter {
    /// Whether a stored item falls under this filter.
    pub fn matches(&self, record: &ItemRecord) -> bool {
        match self {
            KindFilter::Image => {
                record.item.kind == ItemKind::File && record.image_media().is_some()
            }
            KindFilter::Link => record.item.kind == ItemKind::Link,
            // the capture model has no separate todo kind; todos are notes
            KindFilter::Note | KindFilter::Todo => record.item.kind == ItemKind::Text,
            KindFilter::File => record.item.kind == ItemKind::File,
        }
    }
}

struct KindCategory {
    filter: KindFilter,
    keywords: &'static [&'static str],
}

/// Evaluated in order; the first category with a keyword hit wins.
const KIND_CATEGORIES: &[KindCategory] = &[
    KindCategory {
        filter: KindFilter::Image,
        keywords: &[
            "image",
            "images",
            "photo",
            "photos",
            "picture",
            "pictures",
            "screenshot",
            "screenshots",
            "pic",
            "pics",
        ],
    },
    KindCategory {
        filter: KindFilter::Link,
        keywords: &[
            "link", "links", "url", "urls", "article", "articles", "website", "websites", "site",
            "sites",
        ],
    },
    KindCategory {
        filter: KindFilter::Note,
        keywords: &["note", "notes", "memo", "memos", "text", "texts"],
    },
    KindCategory {
        filter: KindFilter::File,
        keywords: &[
            "file",
            "files",
            "document",
            "documents",
            "doc",
            "docs",
            "pdf",
            "pdfs",
        ],
    },
    KindCategory {
        filter: KindFilter::Todo,
        keywords: &["todo", "todos", "task", "tasks"],
    },
];

/// Filler stripped from the residual query along with matched keywords.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "my", "all", "any", "some", "with", "about", "of", "for", "in", "on", "at",
    "to", "from", "by", "me", "show", "find", "get", "that", "this", "i", "saved",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub kind: Option<KindFilter>,
    /// Residual query after stripping kind keywords and filler. Empty with a
    /// detected kind means "browse everything of this kind".
    pub cleaned: String,
}

/// Interpret a free-text query into a kind filter and a cleaned residual.
pub fn interpret(query: &str) -> Interpretation {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    let detected = KIND_CATEGORIES
        .iter()
        .find(|category| tokens.iter().any(|t| category.keywords.contains(&t.as_str())));

    let matched_keywords: &[&str] = detected.map(|c| c.keywords).unwrap_or(&[]);

    let cleaned = tokens
        .iter()
        .filter(|t| !matched_keywords.contains(&t.as_str()))
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    Interpretation {
        kind: detected.map(|c| c.filter),
        cleaned,
    }
}
