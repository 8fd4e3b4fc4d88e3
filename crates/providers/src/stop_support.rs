//! Which models honor a `stop` request parameter.
//!
//! Models matching any pattern in the list get the parameter stripped
//! before the request leaves, instead of having it silently ignored.

use parley_config::InvocationConfig;
use parley_core::provider::ProviderRequest;
use tracing::debug;

/// Bumped whenever [`DEFAULT_STOP_UNSUPPORTED`] changes.
pub const STOP_PATTERNS_VERSION: u32 = 3;

/// Lowercase substrings of model ids known not to honor stop sequences.
pub const DEFAULT_STOP_UNSUPPORTED: &[&str] = &[
    ":free",
    "preview",
    "openai/o1",
    "openai/o3",
    "openai/o4",
    "openai/gpt-5",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSupport {
    patterns: Vec<String>,
    version: u32,
}

impl Default for StopSupport {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_STOP_UNSUPPORTED.iter().map(|p| p.to_string()).collect(),
            version: STOP_PATTERNS_VERSION,
        }
    }
}

impl StopSupport {
    /// A custom pattern list. Its version is 0 to mark it as not built in.
    pub fn with_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            version: 0,
        }
    }

    pub fn from_config(config: &InvocationConfig) -> Self {
        match &config.stop_unsupported_models {
            Some(patterns) => Self::with_patterns(patterns),
            None => Self::default(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// The first pattern that excludes `model`, if any.
    pub fn unsupported_by(&self, model: &str) -> Option<&str> {
        let model = model.to_lowercase();
        self.patterns
            .iter()
            .find(|p| model.contains(p.as_str()))
            .map(String::as_str)
    }

    pub fn supports_stop(&self, model: &str) -> bool {
        self.unsupported_by(model).is_none()
    }

    /// Strip `stop` from `request` when its model does not honor it.
    /// Returns true if something was removed.
    pub fn apply(&self, request: &mut ProviderRequest) -> bool {
        if request.stop.is_none() {
            return false;
        }
        match self.unsupported_by(&request.model) {
            Some(pattern) => {
                debug!(model = %request.model, pattern, "Model ignores stop sequences; omitting");
                request.stop = None;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::Message;

    #[test]
    fn default_list_matches_families() {
        let support = StopSupport::default();
        assert!(!support.supports_stop("meta-llama/llama-3.3-70b-instruct:free"));
        assert!(!support.supports_stop("google/gemini-2.5-flash-PREVIEW"));
        assert!(!support.supports_stop("openai/o3-mini"));
        assert!(support.supports_stop("anthropic/claude-sonnet-4"));
        assert!(support.supports_stop("openai/gpt-4o"));
        assert_eq!(support.version(), STOP_PATTERNS_VERSION);
    }

    #[test]
    fn apply_strips_only_for_unsupported() {
        let support = StopSupport::default();
        let stop = vec!["\nUser:".to_string()];

        let mut req = ProviderRequest::new("mistralai/mistral-7b:free", vec![Message::user("hi")])
            .with_stop(stop.clone());
        assert!(support.apply(&mut req));
        assert!(req.stop.is_none());

        let mut req = ProviderRequest::new("anthropic/claude-sonnet-4", vec![Message::user("hi")])
            .with_stop(stop.clone());
        assert!(!support.apply(&mut req));
        assert_eq!(req.stop, Some(stop));
    }

    #[test]
    fn config_overrides_builtin_list() {
        let config = InvocationConfig {
            stop_unsupported_models: Some(vec![" Acme/ ".into(), "".into()]),
            ..Default::default()
        };
        let support = StopSupport::from_config(&config);
        assert_eq!(support.patterns(), ["acme/"]);
        assert_eq!(support.version(), 0);
        assert!(!support.supports_stop("ACME/turbo"));
        assert!(support.supports_stop("x/y:free"));
    }
}
