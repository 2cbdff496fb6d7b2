//! Application wiring: capture operations, queue lifecycle and search.
//!
//! Dependencies (store, adapter, OCR, vector store) are constructed once
//! here and injected into the worker and the search engine.

use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

use crate::ai::AiAdapter;
use crate::config::Config;
use crate::eid::Eid;
use crate::items::{
    BackendJson, ContentPatch, Item, ItemCreate, ItemKind, ItemPatch, ItemRecord, ItemStatus,
    ItemStore, Media, MediaType,
};
use crate::ocr::{DisabledOcr, OcrEngine, TesseractOcr};
use crate::pipeline::{EnrichmentWorker, JobQueue};
use crate::search::{HybridSearchEngine, SearchResult};
use crate::storage::{BackendLocal, StorageManager};
use crate::vector::VectorStore;

/// Title derived from note text is capped at this many characters.
const NOTE_TITLE_MAX: usize = 80;

pub struct App {
    store: Arc<dyn ItemStore>,
    storage: Arc<dyn StorageManager>,
    ai: Arc<AiAdapter>,
    vectors: Arc<VectorStore>,
    engine: HybridSearchEngine,
    queue: Option<JobQueue>,
    queue_handle: Option<std::thread::JoinHandle<()>>,
    config: Config,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let storage: Arc<dyn StorageManager> = Arc::new(
            BackendLocal::new(config.base_path()).context("failed to open data directory")?,
        );
        let store: Arc<dyn ItemStore> = Arc::new(BackendJson::load(storage.clone())?);
        let ai = Arc::new(AiAdapter::from_config(&config.ai));
        let vectors = Arc::new(VectorStore::load(
            storage.clone(),
            ai.embed_dimensions(),
            &ai.embed_fingerprint(),
        ));
        let engine = HybridSearchEngine::new(store.clone(), vectors.clone(), ai.clone());

        Ok(Self {
            store,
            storage,
            ai,
            vectors,
            engine,
            queue: None,
            queue_handle: None,
            config,
        })
    }

    /// Start the enrichment queue. Interrupted jobs from a previous run are
    /// re-dispatched immediately.
    pub fn run_queue(&mut self) {
        let ocr: Arc<dyn OcrEngine> = if self.config.ocr.enabled {
            Arc::new(TesseractOcr::new(&self.config.ocr.binary))
        } else {
            Arc::new(DisabledOcr)
        };

        let worker = Arc::new(EnrichmentWorker::new(
            self.store.clone(),
            self.storage.clone(),
            self.ai.clone(),
            ocr,
            self.vectors.clone(),
            Duration::from_secs(self.config.fetch.timeout_secs),
        ));

        let (queue, handle) =
            JobQueue::start(worker, self.storage.clone(), self.config.queue.clone());
        self.queue = Some(queue);
        self.queue_handle = Some(handle);
    }

    fn enqueue(&self, item: &Item) -> anyhow::Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| anyhow!("enrichment queue is not running"))?;
        queue.enqueue(item.id, item.kind)
    }

    /// Capture a text note: item created PENDING, body stored, job enqueued.
    pub fn capture_text(&self, title: Option<String>, text: String) -> anyhow::Result<Item> {
        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("refusing to capture an empty note");
        }

        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| derive_note_title(&text));

        let item = self.store.create(ItemCreate {
            kind: ItemKind::Text,
            title,
            source_url: None,
        })?;
        self.store.upsert_content(
            item.id,
            ContentPatch {
                text: Some(text),
                ..Default::default()
            },
        )?;

        self.enqueue(&item)?;
        Ok(item)
    }

    /// Capture a web link.
    pub fn capture_link(&self, url: String) -> anyhow::Result<Item> {
        let url = url.trim().to_string();
        if url.is_empty() {
            bail!("refusing to capture an empty url");
        }

        let item = self.store.create(ItemCreate {
            kind: ItemKind::Link,
            title: url.clone(),
            source_url: Some(url),
        })?;

        self.enqueue(&item)?;
        Ok(item)
    }

    /// Capture a file from disk: bytes stored as an asset, media row
    /// attached, job enqueued.
    pub fn capture_file(&self, path: &Path) -> anyhow::Result<Item> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();

        let asset_id = Eid::new();
        self.storage
            .write(&asset_id, &bytes)
            .context("failed to store asset")?;

        let media_type = detect_media_type(&bytes);
        let (width, height) = if media_type == MediaType::Image {
            probe_image_dimensions(&bytes)
        } else {
            (None, None)
        };

        let item = self.store.create(ItemCreate {
            kind: ItemKind::File,
            title,
            source_url: None,
        })?;
        self.store.add_media(
            item.id,
            Media {
                url: asset_id.to_string(),
                media_type,
                width,
                height,
            },
        )?;

        self.enqueue(&item)?;
        Ok(item)
    }

    pub fn search(&self, query: &str, limit: usize, min_score: Option<f32>) -> anyhow::Result<Vec<SearchResult>> {
        let min_score = min_score.unwrap_or(self.config.search.min_score);
        self.engine.search(query, limit, min_score)
    }

    pub fn show(&self, id: u64) -> anyhow::Result<Option<ItemRecord>> {
        self.store.get(id)
    }

    pub fn list(&self) -> anyhow::Result<Vec<ItemRecord>> {
        self.store.list()
    }

    /// Reset an item to PENDING and re-enqueue its enrichment job.
    pub fn retry(&self, id: u64) -> anyhow::Result<Item> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        let item = self.store.update(
            record.item.id,
            ItemPatch {
                status: Some(ItemStatus::Pending),
                ..Default::default()
            },
        )?;

        self.enqueue(&item)?;
        Ok(item)
    }

    /// Delete an item; its vector goes with it.
    pub fn delete(&self, id: u64) -> anyhow::Result<()> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        if let Some(embedding) = &record.embedding {
            self.vectors.delete(&embedding.vector_ref);
        }
        for media in &record.media {
            if !media.url.starts_with("http") && self.storage.exists(&media.url) {
                if let Err(e) = self.storage.delete(&media.url) {
                    log::warn!("failed to delete asset {}: {e}", media.url);
                }
            }
        }

        self.store.delete(id)
    }

    /// Block until the queue has no outstanding jobs.
    pub fn drain(&self) {
        let Some(queue) = &self.queue else { return };
        while queue.in_flight() > 0 {
            sleep(Duration::from_millis(100));
        }
    }

    /// Graceful shutdown: in-flight jobs finish, then the dispatcher exits.
    pub fn shutdown(&mut self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        if let Some(handle) = self.queue_handle.take() {
            if handle.join().is_err() {
                log::error!("queue dispatcher panicked during shutdown");
            }
        }
        self.queue = None;
    }
}

fn derive_note_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= NOTE_TITLE_MAX {
        return first_line.to_string();
    }
    first_line.chars().take(NOTE_TITLE_MAX).collect()
}

fn detect_media_type(bytes: &[u8]) -> MediaType {
    match infer::get(bytes).map(|t| t.matcher_type()) {
        Some(infer::MatcherType::Image) => MediaType::Image,
        Some(infer::MatcherType::Video) => MediaType::Video,
        Some(infer::MatcherType::Audio) => MediaType::Audio,
        _ => MediaType::Document,
    }
}

fn probe_image_dimensions(bytes: &[u8]) -> (Option<u32>, Option<u32>) {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            use image::GenericImageView;
            let (w, h) = img.dimensions();
            (Some(w), Some(h))
        }
        Err(e) => {
            log::debug!("couldnt probe image dimensions: {e}");
            (None, None)
        }
    }
}
