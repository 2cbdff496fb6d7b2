//! Static model routing per provider backend.
//!
//! Which chat/vision/embedding model a backend serves (and the embedding
//! dimensionality that comes with it) is a fixed property of the backend,
//! selected once from config. Keeping it in one table keeps the fallback
//! path testable.

use serde::{Deserialize, Serialize};

/// Which class of provider an endpoint is. Declared in config, never
/// inferred from the base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// Self-hosted OpenAI-compatible endpoint (e.g. an Ollama gateway)
    Local,
    /// Hosted OpenAI-compatible endpoint
    Remote,
}

impl std::fmt::Display for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderBackend::Local => write!(f, "local"),
            ProviderBackend::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModelRoutes {
    pub chat_model: &'static str,
    pub vision_model: &'static str,
    pub embed_model: &'static str,
    pub embed_dimensions: usize,
}

const LOCAL_ROUTES: ModelRoutes = ModelRoutes {
    chat_model: "llama3.1:8b",
    vision_model: "llava:13b",
    embed_model: "nomic-embed-text",
    embed_dimensions: 768,
};

const REMOTE_ROUTES: ModelRoutes = ModelRoutes {
    chat_model: "gpt-4o-mini",
    vision_model: "gpt-4o-mini",
    embed_model: "text-embedding-3-small",
    embed_dimensions: 1536,
};

pub const fn routes_for(backend: ProviderBackend) -> &'static ModelRoutes {
    match backend {
        ProviderBackend::Local => &LOCAL_ROUTES,
        ProviderBackend::Remote => &REMOTE_ROUTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_are_backend_specific() {
        let local = routes_for(ProviderBackend::Local);
        let remote = routes_for(ProviderBackend::Remote);

        assert_eq!(local.embed_dimensions, 768);
        assert_eq!(remote.embed_dimensions, 1536);
        assert_ne!(local.embed_model, remote.embed_model);
    }

    #[test]
    fn test_backend_parses_from_config_string() {
        let backend: ProviderBackend = serde_yml::from_str("local").unwrap();
        assert_eq!(backend, ProviderBackend::Local);
        let backend: ProviderBackend = serde_yml::from_str("remote").unwrap();
        assert_eq!(backend, ProviderBackend::Remote);
    }
}
