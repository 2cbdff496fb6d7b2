use crate::ai::routes::ProviderBackend;
use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const QUEUE_CONCURRENCY: u16 = 5;
const QUEUE_MAX_RETRIES: u8 = 3;
const QUEUE_BASE_DELAY_MS: u64 = 5000;

/// Default minimum cosine similarity for semantic candidates
const DEFAULT_MIN_SCORE: f32 = 0.25;
/// Default page metadata fetch budget in seconds
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
/// Default AI provider call budget in seconds
const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

/// Configuration for the enrichment job queue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded worker pool size
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: u16,

    /// Maximum retry attempts for transient failures
    #[serde(default = "default_queue_max_retries")]
    pub max_retries: u8,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_queue_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: QUEUE_CONCURRENCY,
            max_retries: QUEUE_MAX_RETRIES,
            base_delay_ms: QUEUE_BASE_DELAY_MS,
        }
    }
}

fn default_queue_concurrency() -> u16 {
    QUEUE_CONCURRENCY
}

fn default_queue_max_retries() -> u8 {
    QUEUE_MAX_RETRIES
}

fn default_queue_base_delay_ms() -> u64 {
    QUEUE_BASE_DELAY_MS
}

/// A single AI provider endpoint. The backend is an explicit enum selected
/// here, never inferred from the URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub backend: ProviderBackend,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AiConfig {
    /// Primary provider; when absent the adapter degrades to no-op fallbacks
    #[serde(default)]
    pub primary: Option<ProviderConfig>,

    /// Secondary provider, consulted only on model-unavailable errors
    #[serde(default)]
    pub secondary: Option<ProviderConfig>,

    /// Per-call timeout in seconds
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ai_timeout_secs() -> u64 {
    DEFAULT_AI_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the tesseract binary
    #[serde(default = "default_ocr_binary")]
    pub binary: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "tesseract".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ocr_binary() -> String {
    "tesseract".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum similarity score for semantic candidates [0.0, 1.0]
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

fn default_min_score() -> f32 {
    DEFAULT_MIN_SCORE
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page metadata fetch budget in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    fn validate(&mut self) {
        if self.queue.concurrency == 0 {
            self.queue.concurrency = 1
        }

        if !(0.0..=1.0).contains(&self.search.min_score) {
            panic!(
                "search.min_score must be between 0.0 and 1.0, got {}",
                self.search.min_score
            );
        }

        if self.fetch.timeout_secs == 0 {
            panic!("fetch.timeout_secs must be greater than 0");
        }

        if self.ai.timeout_secs == 0 {
            panic!("ai.timeout_secs must be greater than 0");
        }

        for provider in [&self.ai.primary, &self.ai.secondary]
            .into_iter()
            .flatten()
        {
            if provider.base_url.is_empty() {
                panic!("ai provider base_url must not be empty");
            }
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("couldnt create config dir");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("couldnt write default config");
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("couldnt read config"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("couldnt create config dir");

        let config_str = serde_yml::to_string(&self).unwrap();
        store
            .write("config.yaml", config_str.as_bytes())
            .expect("couldnt write config");
    }
}
