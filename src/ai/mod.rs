//! Uniform interface to the text/vision/embedding provider.
//!
//! `summarize` and `classify` degrade to deterministic fallbacks so a
//! missing or unreachable provider never blocks the pipeline. `embed` and
//! `describe_image` fail upward because their callers need to know whether
//! to skip the embedding or vision step entirely.
//!
//! Two backends may be configured; the secondary is consulted only when the
//! primary reports the routed model as unavailable. Any other error class
//! propagates immediately so real outages are not masked.

pub mod provider;
pub mod routes;

use crate::config::AiConfig;
use crate::errors::EnrichError;
use crate::items::ItemKind;
use routes::ProviderBackend;
use serde::Deserialize;
use std::time::Duration;

pub use provider::ProviderClient;

/// Deterministic summary fallback length in characters
const SUMMARY_FALLBACK_MAX: usize = 280;

/// A single provider endpoint the adapter can call.
pub trait AiBackend: Send + Sync {
    fn backend(&self) -> ProviderBackend;
    fn chat(&self, prompt: &str) -> Result<String, EnrichError>;
    fn chat_vision(&self, prompt: &str, image: &[u8]) -> Result<String, EnrichError>;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError>;
    fn embed_dimensions(&self) -> usize;
    fn embed_model(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ItemKind,
    pub confidence: f32,
}

impl Classification {
    /// The default label callers receive when no provider is reachable.
    pub fn fallback() -> Self {
        Self {
            kind: ItemKind::Text,
            confidence: 0.0,
        }
    }
}

pub struct AiAdapter {
    primary: Option<Box<dyn AiBackend>>,
    secondary: Option<Box<dyn AiBackend>>,
}

impl AiAdapter {
    pub fn from_config(config: &AiConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        let primary = config.primary.as_ref().and_then(|cfg| {
            match ProviderClient::new(cfg, timeout) {
                Ok(client) => Some(Box::new(client) as Box<dyn AiBackend>),
                Err(e) => {
                    log::error!("primary provider init failed: {e}");
                    None
                }
            }
        });

        let secondary = config.secondary.as_ref().and_then(|cfg| {
            match ProviderClient::new(cfg, timeout) {
                Ok(client) => Some(Box::new(client) as Box<dyn AiBackend>),
                Err(e) => {
                    log::error!("secondary provider init failed: {e}");
                    None
                }
            }
        });

        Self { primary, secondary }
    }

    pub fn new(
        primary: Option<Box<dyn AiBackend>>,
        secondary: Option<Box<dyn AiBackend>>,
    ) -> Self {
        Self { primary, secondary }
    }

    pub fn disabled() -> Self {
        Self {
            primary: None,
            secondary: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.primary.is_some()
    }

    /// Embedding dimensionality of the active route. Stable even when no
    /// provider is configured so the vector index can be sized at startup.
    pub fn embed_dimensions(&self) -> usize {
        self.primary
            .as_ref()
            .map(|p| p.embed_dimensions())
            .unwrap_or(routes::routes_for(ProviderBackend::Local).embed_dimensions)
    }

    /// Identifies the embedding route for vector dump invalidation.
    pub fn embed_fingerprint(&self) -> String {
        match &self.primary {
            Some(p) => format!("{}:{}", p.embed_model(), p.embed_dimensions()),
            None => "unconfigured".to_string(),
        }
    }

    /// Try the primary; on a model-unavailable error, and only then, retry
    /// once against the secondary if one is configured.
    fn with_fallback<T>(
        &self,
        op: &str,
        call: impl Fn(&dyn AiBackend) -> Result<T, EnrichError>,
    ) -> Result<T, EnrichError> {
        let primary = self
            .primary
            .as_deref()
            .ok_or_else(|| EnrichError::ModelUnavailable("no provider configured".to_string()))?;

        match call(primary) {
            Err(EnrichError::ModelUnavailable(reason)) => match &self.secondary {
                Some(secondary) => {
                    log::warn!(
                        "{op}: {} backend unavailable ({reason}), falling back to {}",
                        primary.backend(),
                        secondary.backend()
                    );
                    call(secondary.as_ref())
                }
                None => Err(EnrichError::ModelUnavailable(reason)),
            },
            other => other,
        }
    }

    /// Summarize text. Degrades to a truncation of the input on any failure.
    pub fn summarize(&self, text: &str) -> String {
        let prompt = format!(
            "Summarize the following content in two or three sentences. \
             Reply with the summary only.\n\n{text}"
        );

        match self.with_fallback("summarize", |backend| backend.chat(&prompt)) {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => truncate_fallback(text),
            Err(e) => {
                log::debug!("summarize degraded to truncation: {e}");
                truncate_fallback(text)
            }
        }
    }

    /// Classify text into a content kind. Degrades to the default label.
    pub fn classify(&self, text: &str) -> Classification {
        let prompt = format!(
            "Classify the following content as one of: text, link, file. \
             Reply with JSON only, like {{\"kind\": \"text\", \"confidence\": 0.9}}.\n\n{text}"
        );

        match self.with_fallback("classify", |backend| backend.chat(&prompt)) {
            Ok(reply) => parse_classification(&reply).unwrap_or_else(|| {
                log::debug!("classify reply unparseable, using default label");
                Classification::fallback()
            }),
            Err(e) => {
                log::debug!("classify degraded to default label: {e}");
                Classification::fallback()
            }
        }
    }

    /// Generate an embedding. Fails upward so the caller can skip the
    /// embedding step entirely.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        self.with_fallback("embed", |backend| backend.embed(text))
    }

    /// Describe an image. Fails upward so the caller can skip the vision
    /// branch entirely.
    pub fn describe_image(&self, image: &[u8]) -> Result<String, EnrichError> {
        self.with_fallback("describe_image", |backend| {
            backend.chat_vision(
                "Describe this image in one or two sentences for search indexing. \
                 Mention any visible text.",
                image,
            )
        })
    }
}

/// Truncate text to the fallback summary budget without splitting a char.
fn truncate_fallback(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_FALLBACK_MAX {
        return text.to_string();
    }
    let truncated: String = text.chars().take(SUMMARY_FALLBACK_MAX - 3).collect();
    format!("{}...", truncated.trim_end())
}

#[derive(Deserialize)]
struct ClassifyReply {
    kind: String,
    #[serde(default)]
    confidence: f32,
}

fn parse_classification(reply: &str) -> Option<Classification> {
    // models wrap JSON in code fences often enough to strip them here
    let cleaned = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: ClassifyReply = serde_json::from_str(cleaned).ok()?;
    let kind = match parsed.kind.to_lowercase().as_str() {
        "text" | "note" => ItemKind::Text,
        "link" | "article" | "url" => ItemKind::Link,
        "file" | "image" | "document" => ItemKind::File,
        _ => return None,
    };

    Some(Classification {
        kind,
        confidence: parsed.confidence.clamp(0.0, 1.0),
    })
}
