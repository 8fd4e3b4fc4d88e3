//! Generation configuration domain types.
//!
//! A [`GenerationConfig`] is the effective, fully merged configuration used
//! for one completion request. It is produced from a persona's built-in
//! defaults, optionally overlaid with a stored [`ConfigOverride`].

use serde::{Deserialize, Serialize};

/// The effective generation configuration for a (user, persona) pair.
///
/// Persona defaults are expressed in this same type, which is why every
/// sampling knob is optional: `None` means "let the provider decide".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model identifier (e.g. "anthropic/claude-sonnet-4")
    pub model: String,

    /// Model used when the turn carries images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    // --- Sampling ---
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

    // --- Output controls ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default)]
    pub show_thinking: bool,

    /// Reasoning effort hint ("low", "medium", "high")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Provider routing hints, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_routing: Option<serde_json::Value>,

    // --- Memory subsystem ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u32>,

    /// Declared context window in tokens
    pub context_window: u32,
}

impl GenerationConfig {
    /// A minimal configuration with only the mandatory fields set.
    pub fn new(model: impl Into<String>, context_window: u32) -> Self {
        Self {
            model: model.into(),
            vision_model: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            repetition_penalty: None,
            min_p: None,
            top_a: None,
            seed: None,
            max_tokens: None,
            stop: Vec::new(),
            logit_bias: None,
            response_format: None,
            show_thinking: false,
            reasoning_effort: None,
            provider_routing: None,
            memory_score_threshold: None,
            memory_limit: None,
            context_window,
        }
    }
}

/// A numeric value as the relational store hands it back.
///
/// Decimal columns arrive as strings; the resolver coerces every variant to
/// a plain number and drops values that do not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredNumber {
    Integer(i64),
    Float(f64),
    Decimal(String),
}

impl From<f64> for StoredNumber {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for StoredNumber {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for StoredNumber {
    fn from(v: &str) -> Self {
        Self::Decimal(v.to_string())
    }
}

/// A stored generation-config record: a user-wide default, a per-persona
/// override, or the provider-wide free default.
///
/// `model` is mandatory; every other field falls through to the lower
/// precedence level when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_a: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_thinking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_routing: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_score_threshold: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<StoredNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<StoredNumber>,
}

impl ConfigOverride {
    /// An override that only pins the model.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// Which precedence level produced the effective configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    /// Per-(user, persona) override
    UserPersona,
    /// User-wide default
    UserDefault,
    /// Provider-wide free/guest default
    FreeDefault,
    /// The persona's built-in defaults
    Persona,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPersona => "user-persona",
            Self::UserDefault => "user-default",
            Self::FreeDefault => "free-default",
            Self::Persona => "persona",
        }
    }
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of resolving a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub config: GenerationConfig,
    pub source: ResolutionSource,
    /// Name of the stored record that supplied the override, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Resolution {
    /// A resolution that is just the persona's defaults.
    pub fn persona(defaults: &GenerationConfig) -> Self {
        Self {
            config: defaults.clone(),
            source: ResolutionSource::Persona,
            name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_labels_match_wire_names() {
        assert_eq!(ResolutionSource::UserPersona.to_string(), "user-persona");
        assert_eq!(ResolutionSource::UserDefault.to_string(), "user-default");
        assert_eq!(ResolutionSource::Persona.to_string(), "persona");
        let json = serde_json::to_string(&ResolutionSource::FreeDefault).unwrap();
        assert_eq!(json, "\"free-default\"");
    }

    #[test]
    fn stored_number_deserializes_untagged() {
        let n: StoredNumber = serde_json::from_str("0.7").unwrap();
        assert_eq!(n, StoredNumber::Float(0.7));
        let n: StoredNumber = serde_json::from_str("40").unwrap();
        assert_eq!(n, StoredNumber::Integer(40));
        let n: StoredNumber = serde_json::from_str("\"1.05\"").unwrap();
        assert_eq!(n, StoredNumber::Decimal("1.05".into()));
    }

    #[test]
    fn persona_config_parses_from_toml_shape() {
        let json = serde_json::json!({
            "model": "m1",
            "temperature": 0.8,
            "context_window": 8000
        });
        let config: GenerationConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.model, "m1");
        assert_eq!(config.temperature, Some(0.8));
        assert!(config.stop.is_empty());
        assert!(!config.show_thinking);
    }
}
