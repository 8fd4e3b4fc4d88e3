//! Provider trait — the abstraction over chat-completion backends.
//!
//! A Provider knows how to send a message list to an LLM and return the
//! generated content. The resilient invocation engine treats it as an opaque
//! async call and relies only on `content` and `metadata`.

use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::generation::GenerationConfig;
use crate::message::Message;

/// Sampling parameters forwarded to the provider. `None` fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    #[serde(flatten)]
    pub sampling: SamplingParams,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences. `None` means the field is not sent at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Provider routing hints, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_routing: Option<serde_json::Value>,

    /// Per-call timeout, set by the invocation engine
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ProviderRequest {
    /// A request with no sampling overrides.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling: SamplingParams::default(),
            max_tokens: None,
            stop: None,
            logit_bias: None,
            response_format: None,
            reasoning_effort: None,
            provider_routing: None,
            timeout: None,
        }
    }

    /// Build a request from a resolved configuration.
    pub fn from_config(config: &GenerationConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            sampling: SamplingParams {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                frequency_penalty: config.frequency_penalty,
                presence_penalty: config.presence_penalty,
                repetition_penalty: config.repetition_penalty,
                min_p: config.min_p,
                top_a: config.top_a,
                seed: config.seed,
            },
            max_tokens: config.max_tokens,
            stop: if config.stop.is_empty() {
                None
            } else {
                Some(config.stop.clone())
            },
            logit_bias: config.logit_bias.clone(),
            response_format: config.response_format.clone(),
            reasoning_effort: config.reasoning_effort.clone(),
            provider_routing: config.provider_routing.clone(),
            timeout: None,
        }
    }

    /// Set stop sequences.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// One part of a structured (multi-part) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
        }
    }
}

/// Generated content: a plain string or an array of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// The visible text, with text-bearing parts concatenated in order.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// Token usage information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider-reported details about how generation ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// "stop", "length", "content_filter", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// The stop sequence that fired, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_value: Option<String>,

    /// Which model actually responded (may differ from requested)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A complete response from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Content,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl ProviderResponse {
    /// A plain-text response with no metadata.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Content::Text(content.into()),
            metadata: None,
        }
    }
}

/// The core Provider trait.
///
/// Every chat-completion backend implements this trait. The invocation engine
/// calls `complete()` without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_omits_empty_stop() {
        let config = GenerationConfig::new("m1", 8000);
        let req = ProviderRequest::from_config(&config, vec![Message::user("hi")]);
        assert_eq!(req.model, "m1");
        assert!(req.stop.is_none());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("stop").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn from_config_carries_sampling_and_stop() {
        let mut config = GenerationConfig::new("m1", 8000);
        config.temperature = Some(0.9);
        config.top_k = Some(40);
        config.stop = vec!["</reply>".into()];
        let req = ProviderRequest::from_config(&config, vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], serde_json::json!(0.9));
        assert_eq!(json["top_k"], serde_json::json!(40));
        assert_eq!(json["stop"], serde_json::json!(["</reply>"]));
    }

    #[test]
    fn content_parts_concatenate_text() {
        let content = Content::Parts(vec![
            ContentPart::text("Hello, "),
            ContentPart {
                kind: "image_url".into(),
                text: None,
            },
            ContentPart::text("world"),
        ]);
        assert_eq!(content.to_text(), "Hello, world");
    }

    #[test]
    fn content_deserializes_both_shapes() {
        let text: Content = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(text, Content::Text("plain".into()));
        let parts: Content =
            serde_json::from_str(r#"[{"type":"text","text":"a"},{"type":"text","text":"b"}]"#)
                .unwrap();
        assert_eq!(parts.to_text(), "ab");
    }
}
