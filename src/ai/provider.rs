//! HTTP client for an OpenAI-compatible provider endpoint.
//!
//! The only component allowed to speak the provider wire protocol. Errors
//! are classified from transport facts and HTTP status, never from message
//! substrings: 404 means the routed model is absent (fallback-eligible),
//! timeouts/5xx are transient, remaining 4xx are terminal provider errors.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ai::routes::{routes_for, ModelRoutes, ProviderBackend};
use crate::ai::AiBackend;
use crate::config::ProviderConfig;
use crate::errors::EnrichError;

pub struct ProviderClient {
    backend: ProviderBackend,
    base_url: String,
    api_key: Option<String>,
    routes: &'static ModelRoutes,
    http: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, EnrichError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichError::Provider(format!("http client init failed: {e}")))?;

        Ok(Self {
            backend: config.backend,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            routes: routes_for(config.backend),
            http,
        })
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Vec<u8>, EnrichError> {
        let url = format!("{}{path}", self.base_url);

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(EnrichError::from)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            // the route is the only thing we request by name
            return Err(EnrichError::ModelUnavailable(format!(
                "{} backend has no such model",
                self.backend
            )));
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            return Err(EnrichError::TransientFetch(format!(
                "{url} answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(EnrichError::Provider(format!("{url} answered {status}")));
        }

        Ok(response.bytes().map_err(EnrichError::from)?.to_vec())
    }

    fn chat_request(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, EnrichError> {
        let body = ChatRequest {
            model,
            messages,
            temperature: 0.2,
        };

        let data = self.post_json("/chat/completions", &body)?;
        let response: ChatResponse = serde_json::from_slice(&data)
            .map_err(|e| EnrichError::Provider(format!("malformed chat response: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| EnrichError::Provider("chat response had no content".to_string()))
    }
}

impl AiBackend for ProviderClient {
    fn backend(&self) -> ProviderBackend {
        self.backend
    }

    fn chat(&self, prompt: &str) -> Result<String, EnrichError> {
        self.chat_request(
            self.routes.chat_model,
            vec![ChatMessage {
                role: "user",
                content: MessageContent::Text(prompt.to_string()),
            }],
        )
    }

    fn chat_vision(&self, prompt: &str, image: &[u8]) -> Result<String, EnrichError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        self.chat_request(
            self.routes.vision_model,
            vec![ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{encoded}"),
                        },
                    },
                ]),
            }],
        )
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        let body = EmbedRequest {
            model: self.routes.embed_model,
            input: text,
        };

        let data = self.post_json("/embeddings", &body)?;
        let response: EmbedResponse = serde_json::from_slice(&data)
            .map_err(|e| EnrichError::Provider(format!("malformed embed response: {e}")))?;

        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EnrichError::Provider("embed response had no data".to_string()))?;

        if vector.len() != self.routes.embed_dimensions {
            return Err(EnrichError::DimensionMismatch {
                expected: self.routes.embed_dimensions,
                got: vector.len(),
            });
        }

        Ok(vector)
    }

    fn embed_dimensions(&self) -> usize {
        self.routes.embed_dimensions
    }

    fn embed_model(&self) -> &'static str {
        self.routes.embed_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_request_serializes_as_parts() {
        let message = ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "describe".into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".into(),
                    },
                },
            ]),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_plain_chat_serializes_as_string() {
        let message = ChatMessage {
            role: "user",
            content: MessageContent::Text("hello".into()),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_chat_response_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":" a summary "}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some(" a summary ")
        );
    }

    #[test]
    fn test_embed_response_parses() {
        let raw = r#"{"data":[{"embedding":[0.1,0.2]}],"model":"m"}"#;
        let response: EmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2]);
    }
}
