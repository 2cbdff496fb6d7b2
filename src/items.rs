use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::eid::Eid;
use crate::storage::StorageManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Link,
    File,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Text => write!(f, "text"),
            ItemKind::Link => write!(f, "link"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// Lifecycle status. Only the pipeline advances it:
/// PENDING → PROCESSING → (PROCESSED | FAILED). A manual retry may reset a
/// terminal item back to PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub kind: ItemKind,
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// One-to-one with Item. `text` is the primary searchable prose; `ocr_text`
/// is raw extracted text kept separately for provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Pointer into the vector index. Owned exclusively by the worker's
/// embedding step; deleting an item must delete its vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub item_id: u64,
    pub vector_ref: Eid,
}

/// An item with its content, media and embedding pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item: Item,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl ItemRecord {
    /// First image attachment, if any.
    pub fn image_media(&self) -> Option<&Media> {
        self.media.iter().find(|m| m.media_type == MediaType::Image)
    }
}

#[derive(Debug, Clone)]
pub struct ItemCreate {
    pub kind: ItemKind,
    pub title: String,
    pub source_url: Option<String>,
}

/// Partial-field patch. `None` leaves the field untouched, so the worker
/// never needs to read-modify-write a whole row.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub kind: Option<ItemKind>,
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub text: Option<String>,
    pub ocr_text: Option<String>,
    pub html: Option<String>,
}

/// System of record for items. Implementations provide row-level atomicity
/// for single-item updates; the pipeline never needs multi-item transactions.
pub trait ItemStore: Send + Sync {
    fn create(&self, create: ItemCreate) -> anyhow::Result<Item>;
    fn get(&self, id: u64) -> anyhow::Result<Option<ItemRecord>>;
    fn list(&self) -> anyhow::Result<Vec<ItemRecord>>;
    fn update(&self, id: u64, patch: ItemPatch) -> anyhow::Result<Item>;
    fn upsert_content(&self, id: u64, patch: ContentPatch) -> anyhow::Result<()>;
    fn add_media(&self, id: u64, media: Media) -> anyhow::Result<()>;
    fn set_embedding(&self, id: u64, embedding: Option<Embedding>) -> anyhow::Result<()>;
    fn delete(&self, id: u64) -> anyhow::Result<()>;
}

const ITEMS_DUMP: &str = "items.json";

/// JSON-file backed item store.
pub struct BackendJson {
    records: Arc<RwLock<Vec<ItemRecord>>>,
    storage: Arc<dyn StorageManager>,
}

impl BackendJson {
    pub fn load(storage: Arc<dyn StorageManager>) -> anyhow::Result<Self> {
        let records = if storage.exists(ITEMS_DUMP) {
            let data = storage.read(ITEMS_DUMP)?;
            serde_json::from_slice(&data)?
        } else {
            log::info!("creating new item database");
            Vec::new()
        };

        Ok(Self {
            records: Arc::new(RwLock::new(records)),
            storage,
        })
    }

    fn save(&self, records: &[ItemRecord]) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(records)?;
        self.storage.write(ITEMS_DUMP, &data)?;
        Ok(())
    }

    fn next_id(records: &[ItemRecord]) -> u64 {
        records.iter().map(|r| r.item.id).max().unwrap_or(0) + 1
    }
}

impl ItemStore for BackendJson {
    fn create(&self, create: ItemCreate) -> anyhow::Result<Item> {
        let mut records = self.records.write().unwrap();

        let item = Item {
            id: Self::next_id(&records),
            kind: create.kind,
            title: create.title,
            summary: String::new(),
            source_url: create.source_url,
            status: ItemStatus::Pending,
            created_at: Utc::now(),
        };

        records.push(ItemRecord {
            item: item.clone(),
            content: Content::default(),
            media: Vec::new(),
            embedding: None,
        });
        self.save(&records)?;

        Ok(item)
    }

    fn get(&self, id: u64) -> anyhow::Result<Option<ItemRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.iter().find(|r| r.item.id == id).cloned())
    }

    fn list(&self) -> anyhow::Result<Vec<ItemRecord>> {
        let records = self.records.read().unwrap();
        Ok(records.clone())
    }

    fn update(&self, id: u64, patch: ItemPatch) -> anyhow::Result<Item> {
        let mut records = self.records.write().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.item.id == id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        if let Some(title) = patch.title {
            record.item.title = title;
        }
        if let Some(summary) = patch.summary {
            record.item.summary = summary;
        }
        if let Some(kind) = patch.kind {
            record.item.kind = kind;
        }
        if let Some(status) = patch.status {
            record.item.status = status;
        }

        let item = record.item.clone();
        self.save(&records)?;
        Ok(item)
    }

    fn upsert_content(&self, id: u64, patch: ContentPatch) -> anyhow::Result<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.item.id == id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        if let Some(text) = patch.text {
            record.content.text = Some(text);
        }
        if let Some(ocr_text) = patch.ocr_text {
            record.content.ocr_text = Some(ocr_text);
        }
        if let Some(html) = patch.html {
            record.content.html = Some(html);
        }

        self.save(&records)?;
        Ok(())
    }

    fn add_media(&self, id: u64, media: Media) -> anyhow::Result<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.item.id == id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        record.media.push(media);
        self.save(&records)?;
        Ok(())
    }

    fn set_embedding(&self, id: u64, embedding: Option<Embedding>) -> anyhow::Result<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.item.id == id)
            .ok_or_else(|| anyhow!("item {id} not found"))?;

        record.embedding = embedding;
        self.save(&records)?;
        Ok(())
    }

    fn delete(&self, id: u64) -> anyhow::Result<()> {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|r| r.item.id != id);
        if records.len() == before {
            return Err(anyhow!("item {id} not found"));
        }
        self.save(&records)?;
        Ok(())
    }
}
