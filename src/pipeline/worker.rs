//! Enrichment worker: turns a raw capture into a searchable, summarized
//! record.
//!
//! Per item the state machine is PENDING → PROCESSING → enrich-by-kind →
//! (embed, best-effort) → PROCESSED. An unrecoverable error in the
//! enrich-by-kind step flips the item to FAILED and short-circuits the
//! embedding step. Embedding failures are logged but never fail the item;
//! search simply won't find it semantically until a retry succeeds. This
//! asymmetry is deliberate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::AiAdapter;
use crate::errors::EnrichError;
use crate::fetch;
use crate::items::{
    ContentPatch, Embedding, ItemKind, ItemPatch, ItemRecord, ItemStatus, ItemStore, Media,
    MediaType,
};
use crate::ocr::OcrEngine;
use crate::pipeline::queue::Job;
use crate::storage::StorageManager;
use crate::vector::VectorStore;

/// Character budget for cleaned page text fed to link summaries.
const LINK_TEXT_BUDGET: usize = 5_000;
/// Character budget for combined OCR+vision text fed to image summaries.
const IMAGE_TEXT_BUDGET: usize = 2_000;
/// Character budget for the assembled embedding blob.
const EMBED_TEXT_BUDGET: usize = 8_000;
/// Vision text shorter than this is not worth an explicit label.
const MIN_VISION_LEN: usize = 20;

pub struct EnrichmentWorker {
    store: Arc<dyn ItemStore>,
    storage: Arc<dyn StorageManager>,
    ai: Arc<AiAdapter>,
    ocr: Arc<dyn OcrEngine>,
    vectors: Arc<VectorStore>,
    fetch_timeout: Duration,
}

fn store_err(err: anyhow::Error) -> EnrichError {
    EnrichError::Store(err.to_string())
}

impl EnrichmentWorker {
    pub fn new(
        store: Arc<dyn ItemStore>,
        storage: Arc<dyn StorageManager>,
        ai: Arc<AiAdapter>,
        ocr: Arc<dyn OcrEngine>,
        vectors: Arc<VectorStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            ai,
            ocr,
            vectors,
            fetch_timeout,
        }
    }

    /// Execute one enrichment job. `final_attempt` tells the worker whether
    /// a retryable failure still has retries left; either way the item never
    /// stays in PROCESSING once this returns.
    pub fn run_job(&self, job: &Job, final_attempt: bool) -> Result<(), EnrichError> {
        let record = self
            .store
            .get(job.item_id)
            .map_err(store_err)?
            .ok_or(EnrichError::ContentNotFound(job.item_id))?;

        if record.item.kind != job.kind {
            return Err(EnrichError::Validation(format!(
                "job kind {} does not match item kind {}",
                job.kind, record.item.kind
            )));
        }

        self.set_status(job.item_id, ItemStatus::Processing)?;

        let enriched = match job.kind {
            ItemKind::Text => self.process_text(&record),
            ItemKind::Link => self.process_link(&record),
            ItemKind::File => self.process_file(&record),
        };

        match enriched {
            Ok(()) => {
                // best-effort: a failed embedding never fails the item
                if let Err(e) = self.embed_item(job.item_id) {
                    log::warn!("item {}: embedding skipped: {e}", job.item_id);
                }
                self.set_status(job.item_id, ItemStatus::Processed)?;
                Ok(())
            }
            Err(err) => {
                let next = if err.is_retryable() && !final_attempt {
                    // queue will re-run this job after backoff
                    ItemStatus::Pending
                } else {
                    ItemStatus::Failed
                };
                if let Err(e) = self.set_status(job.item_id, next) {
                    log::error!("item {}: failed to record status: {e}", job.item_id);
                }
                Err(err)
            }
        }
    }

    fn set_status(&self, item_id: u64, status: ItemStatus) -> Result<(), EnrichError> {
        self.store
            .update(
                item_id,
                ItemPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .map(|_| ())
            .map_err(store_err)
    }

    /// Summarize and classify stored text; the two calls are independent
    /// and run concurrently.
    fn process_text(&self, record: &ItemRecord) -> Result<(), EnrichError> {
        let text = record
            .content
            .text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| record.item.title.clone());

        if text.trim().is_empty() {
            return Ok(());
        }

        let (summary, classification) = std::thread::scope(|s| {
            let summarize = s.spawn(|| self.ai.summarize(&text));
            let classify = s.spawn(|| self.ai.classify(&text));

            // settle both branches before deciding anything
            let summary = summarize.join();
            let classification = classify.join();
            (summary, classification)
        });

        let mut patch = ItemPatch::default();
        match summary {
            Ok(summary) => patch.summary = Some(summary),
            Err(_) => log::error!("item {}: summarize branch panicked", record.item.id),
        }
        match classification {
            Ok(classification) => patch.kind = Some(classification.kind),
            Err(_) => log::error!("item {}: classify branch panicked", record.item.id),
        }

        self.store.update(record.item.id, patch).map_err(store_err)?;
        Ok(())
    }

    /// Fetch page metadata and derive title/summary. Transient fetch
    /// failures propagate for a job-level retry; terminal failures degrade
    /// to the raw URL so the item is never left incomplete.
    fn process_link(&self, record: &ItemRecord) -> Result<(), EnrichError> {
        let item_id = record.item.id;
        let url = record
            .item
            .source_url
            .clone()
            .ok_or_else(|| EnrichError::Validation("link item has no source url".to_string()))?;

        let page = match fetch::fetch_page(&url, self.fetch_timeout) {
            Ok(page) => page,
            Err(err @ EnrichError::TransientFetch(_)) => return Err(err),
            Err(err) => {
                log::warn!("item {item_id}: page fetch failed terminally ({err}), using raw url");
                self.store
                    .update(
                        item_id,
                        ItemPatch {
                            title: Some(url.clone()),
                            summary: Some(url.clone()),
                            ..Default::default()
                        },
                    )
                    .map_err(store_err)?;
                self.store
                    .upsert_content(
                        item_id,
                        ContentPatch {
                            html: Some(fetch::sanitize_anchor(&url, &url)),
                            ..Default::default()
                        },
                    )
                    .map_err(store_err)?;
                return Ok(());
            }
        };

        let title = page
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| url.clone());

        let body_text = fetch::truncate_chars(&fetch::strip_boilerplate(&page.html), LINK_TEXT_BUDGET);

        let summary = match page.description.clone() {
            Some(description) => description,
            None if self.ai.is_available() && !body_text.is_empty() => {
                self.ai.summarize(&body_text)
            }
            None => url.clone(),
        };

        if let Some(image_url) = page.image_url.clone() {
            self.store
                .add_media(
                    item_id,
                    Media {
                        url: image_url,
                        media_type: MediaType::Image,
                        width: None,
                        height: None,
                    },
                )
                .map_err(store_err)?;
        }

        let link_target = page.canonical_url.clone().unwrap_or_else(|| url.clone());
        let text = if !body_text.is_empty() {
            Some(body_text)
        } else {
            page.description.clone()
        };

        self.store
            .upsert_content(
                item_id,
                ContentPatch {
                    text,
                    html: Some(fetch::sanitize_anchor(&link_target, &title)),
                    ..Default::default()
                },
            )
            .map_err(store_err)?;

        self.store
            .update(
                item_id,
                ItemPatch {
                    title: Some(title),
                    summary: Some(summary),
                    ..Default::default()
                },
            )
            .map_err(store_err)?;

        Ok(())
    }

    /// For image attachments, run OCR and vision concurrently and collect
    /// both outcomes (a partial-failure join, never fail-fast). What becomes
    /// the searchable text follows a fixed priority:
    /// vision description > OCR text > placeholder.
    fn process_file(&self, record: &ItemRecord) -> Result<(), EnrichError> {
        let item_id = record.item.id;
        let title = record.item.title.clone();

        let Some(image) = record.image_media() else {
            self.store
                .upsert_content(
                    item_id,
                    ContentPatch {
                        text: Some(format!("file: {title}")),
                        ..Default::default()
                    },
                )
                .map_err(store_err)?;
            return Ok(());
        };

        // loading the asset is the mandatory content-fetch for image files
        let bytes = self.load_media_bytes(item_id, &image.url)?;

        let (ocr_out, vision_out) = std::thread::scope(|s| {
            let ocr = s.spawn(|| self.ocr.extract_text(&bytes));
            let vision = s.spawn(|| self.ai.describe_image(&bytes));
            (ocr.join(), vision.join())
        });

        let ocr_text = match ocr_out {
            Ok(Ok(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Ok(Err(e)) => {
                log::warn!("item {item_id}: ocr failed: {e}");
                None
            }
            Err(_) => {
                log::error!("item {item_id}: ocr branch panicked");
                None
            }
        };

        let vision_text = match vision_out {
            Ok(Ok(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Ok(Err(e)) => {
                log::warn!("item {item_id}: vision failed: {e}");
                None
            }
            Err(_) => {
                log::error!("item {item_id}: vision branch panicked");
                None
            }
        };

        let text = vision_text
            .clone()
            .or_else(|| ocr_text.clone())
            .unwrap_or_else(|| format!("image file: {title}"));

        // vision first, then OCR appended
        let combined = [vision_text.as_deref(), ocr_text.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");

        let summary = if combined.is_empty() {
            None
        } else {
            Some(
                self.ai
                    .summarize(&fetch::truncate_chars(&combined, IMAGE_TEXT_BUDGET)),
            )
        };

        self.store
            .upsert_content(
                item_id,
                ContentPatch {
                    text: Some(text),
                    ocr_text,
                    ..Default::default()
                },
            )
            .map_err(store_err)?;

        if let Some(summary) = summary {
            self.store
                .update(
                    item_id,
                    ItemPatch {
                        summary: Some(summary),
                        ..Default::default()
                    },
                )
                .map_err(store_err)?;
        }

        Ok(())
    }

    fn load_media_bytes(&self, item_id: u64, url: &str) -> Result<Vec<u8>, EnrichError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return fetch::fetch_bytes(url, self.fetch_timeout);
        }

        self.storage.read(url).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EnrichError::ContentNotFound(item_id),
            _ => EnrichError::Store(e.to_string()),
        })
    }

    /// Always attempted after successful enrichment, for every kind.
    /// An empty blob skips the step; it is not an error.
    fn embed_item(&self, item_id: u64) -> Result<(), EnrichError> {
        let record = self
            .store
            .get(item_id)
            .map_err(store_err)?
            .ok_or(EnrichError::ContentNotFound(item_id))?;

        let blob = embedding_text(&record);
        if blob.is_empty() {
            log::debug!("item {item_id}: nothing to embed");
            return Ok(());
        }

        let vector = self.ai.embed(&blob)?;

        let vector_ref = record
            .embedding
            .as_ref()
            .map(|e| e.vector_ref.clone())
            .unwrap_or_default();

        let metadata = HashMap::from([
            ("kind".to_string(), record.item.kind.to_string()),
            ("title".to_string(), record.item.title.clone()),
        ]);

        self.vectors
            .upsert(vector_ref.clone(), item_id, vector, metadata)?;
        self.store
            .set_embedding(
                item_id,
                Some(Embedding {
                    item_id,
                    vector_ref,
                }),
            )
            .map_err(store_err)?;

        Ok(())
    }
}

fn is_placeholder_or_url(text: &str) -> bool {
    text.starts_with("image file:")
        || text.starts_with("file:")
        || text.starts_with("http://")
        || text.starts_with("https://")
}

/// Assemble the labeled embedding blob in fixed precedence: type, title,
/// summary, source domain, primary text, OCR text, and (image items only)
/// an explicit image-description label.
pub fn embedding_text(record: &ItemRecord) -> String {
    let item = &record.item;
    let mut parts: Vec<String> = Vec::new();

    let title = item.title.trim();
    if !title.is_empty() {
        parts.push(format!("title: {title}"));
    }

    let summary = item.summary.trim();
    if !summary.is_empty() {
        parts.push(format!("summary: {summary}"));
    }

    if let Some(domain) = item
        .source_url
        .as_deref()
        .and_then(fetch::source_domain)
    {
        parts.push(format!("source: {domain}"));
    }

    let text = record
        .content
        .text
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if !text.is_empty() {
        let label = match item.kind {
            ItemKind::Text => "note",
            _ => "content",
        };
        parts.push(format!("{label}: {text}"));
    }

    let ocr = record
        .content
        .ocr_text
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if !ocr.is_empty() {
        parts.push(format!("ocr: {ocr}"));
    }

    if item.kind == ItemKind::File
        && record.image_media().is_some()
        && text.chars().count() >= MIN_VISION_LEN
        && !is_placeholder_or_url(text)
    {
        parts.push(format!("image description: \"{text}\""));
    }

    if parts.is_empty() {
        return String::new();
    }

    parts.insert(0, format!("type: {}", item.kind));
    fetch::truncate_chars(&parts.join("\n"), EMBED_TEXT_BUDGET)
}
