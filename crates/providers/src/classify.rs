//! Retry classification for provider failures.
//!
//! Every [`ProviderError`] is projected once into an [`ErrorSignature`]
//! and then matched against two pattern tables, fatal first:
//!
//! 1. [`FATAL`]: credentials, billing/quota, rate and daily limits. Never retried.
//! 2. [`TRANSIENT`]: connection faults, timeouts, aborts. Retried.
//! 3. Anything else is non-retryable.

use parley_core::error::ProviderError;

/// The normalized shape of a provider failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSignature {
    /// System-level error code (`ECONNRESET`, `ETIMEDOUT`, ...)
    pub code: Option<String>,
    /// HTTP status
    pub status: Option<u16>,
    /// Error kind name (`AbortError`, `TimeoutError`, ...)
    pub name: Option<String>,
    pub message: String,
}

impl From<&ProviderError> for ErrorSignature {
    fn from(err: &ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::ApiError { status_code, .. } => Self {
                status: Some(*status_code),
                message,
                ..Default::default()
            },
            ProviderError::RateLimited { .. } => Self {
                status: Some(429),
                name: Some("RateLimitError".into()),
                message,
                ..Default::default()
            },
            ProviderError::AuthenticationFailed(_) => Self {
                name: Some("AuthenticationError".into()),
                message,
                ..Default::default()
            },
            ProviderError::ModelNotFound(_) => Self {
                status: Some(404),
                name: Some("NotFoundError".into()),
                message,
                ..Default::default()
            },
            ProviderError::NotConfigured(_) => Self {
                name: Some("ConfigurationError".into()),
                message,
                ..Default::default()
            },
            ProviderError::Timeout(_) => Self {
                code: Some("ETIMEDOUT".into()),
                name: Some("TimeoutError".into()),
                message,
                ..Default::default()
            },
            ProviderError::Aborted(_) => Self {
                code: Some("ABORTED".into()),
                name: Some("AbortError".into()),
                message,
                ..Default::default()
            },
            ProviderError::Network { code, .. } => Self {
                code: code.clone(),
                message,
                ..Default::default()
            },
        }
    }
}

/// A set of patterns. A signature matches if any one field matches.
#[derive(Debug, Clone, Copy)]
pub struct PatternTable {
    pub codes: &'static [&'static str],
    pub statuses: &'static [u16],
    pub names: &'static [&'static str],
    /// Lowercase substrings of the message
    pub fragments: &'static [&'static str],
}

impl PatternTable {
    pub fn matches(&self, sig: &ErrorSignature) -> bool {
        if let Some(code) = &sig.code {
            if self.codes.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return true;
            }
        }
        if let Some(status) = sig.status {
            if self.statuses.contains(&status) {
                return true;
            }
        }
        if let Some(name) = &sig.name {
            if self.names.iter().any(|n| n == name) {
                return true;
            }
        }
        let message = sig.message.to_ascii_lowercase();
        self.fragments.iter().any(|f| message.contains(f))
    }
}

pub const FATAL: PatternTable = PatternTable {
    codes: &["insufficient_quota", "invalid_api_key"],
    statuses: &[401, 402, 403, 429],
    names: &["AuthenticationError", "RateLimitError"],
    fragments: &[
        "invalid api key",
        "incorrect api key",
        "unauthorized",
        "authentication",
        "insufficient_quota",
        "quota",
        "billing",
        "payment required",
        "credits",
        "rate limit",
        "daily limit",
    ],
};

pub const TRANSIENT: PatternTable = PatternTable {
    codes: &[
        "ECONNRESET",
        "ETIMEDOUT",
        "ENOTFOUND",
        "ECONNREFUSED",
        "EAI_AGAIN",
        "EPIPE",
        "ABORTED",
    ],
    statuses: &[408, 504],
    names: &["AbortError", "TimeoutError"],
    fragments: &[
        "socket hang up",
        "connection reset",
        "timed out",
        "timeout",
        "aborted",
        "network error",
    ],
};

/// How a failure affects the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Permanent; fail immediately
    Fatal,
    /// Infrastructure blip; retry
    Transient,
    /// Unknown; fail fast
    NonRetryable,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        self == ErrorClass::Transient
    }
}

pub fn classify_signature(sig: &ErrorSignature) -> ErrorClass {
    if FATAL.matches(sig) {
        ErrorClass::Fatal
    } else if TRANSIENT.matches(sig) {
        ErrorClass::Transient
    } else {
        ErrorClass::NonRetryable
    }
}

pub fn classify(err: &ProviderError) -> ErrorClass {
    classify_signature(&ErrorSignature::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, message: &str) -> ProviderError {
        ProviderError::ApiError {
            status_code: status,
            message: message.into(),
        }
    }

    #[test]
    fn transient_codes_are_retryable() {
        for code in ["ECONNRESET", "ETIMEDOUT", "ENOTFOUND", "ABORTED"] {
            let err = ProviderError::network(code, "boom");
            assert_eq!(classify(&err), ErrorClass::Transient, "{code}");
        }
        assert_eq!(
            classify(&ProviderError::Aborted("signal".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&ProviderError::Timeout("60s".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn abort_name_alone_is_transient() {
        let sig = ErrorSignature {
            name: Some("AbortError".into()),
            message: "The operation was cancelled".into(),
            ..Default::default()
        };
        assert_eq!(classify_signature(&sig), ErrorClass::Transient);
    }

    #[test]
    fn transient_message_fragments() {
        let err = ProviderError::Network {
            code: None,
            message: "socket hang up".into(),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
        assert_eq!(classify(&api(504, "Gateway Timeout")), ErrorClass::Transient);
    }

    #[test]
    fn fatal_conditions() {
        assert_eq!(
            classify(&ProviderError::AuthenticationFailed("Invalid API key".into())),
            ErrorClass::Fatal
        );
        assert_eq!(classify(&api(402, "Payment Required")), ErrorClass::Fatal);
        assert_eq!(
            classify(&api(400, "You have reached your daily limit")),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&ProviderError::RateLimited { retry_after_secs: 5 }),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn fatal_wins_over_transient() {
        // Mentions both a timeout and a quota problem
        let err = ProviderError::network("ETIMEDOUT", "quota exceeded while waiting");
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn unknown_errors_fail_fast() {
        assert_eq!(classify(&api(500, "Internal Server Error")), ErrorClass::NonRetryable);
        assert_eq!(
            classify(&ProviderError::ModelNotFound("nope/model".into())),
            ErrorClass::NonRetryable
        );
        assert!(!ErrorClass::NonRetryable.is_retryable());
        assert!(ErrorClass::Transient.is_retryable());
    }

    #[test]
    fn signature_projection() {
        let sig = ErrorSignature::from(&ProviderError::network("ECONNRESET", "reset by peer"));
        assert_eq!(sig.code.as_deref(), Some("ECONNRESET"));
        assert_eq!(sig.status, None);
        assert!(sig.message.contains("reset by peer"));

        let sig = ErrorSignature::from(&api(402, "pay up"));
        assert_eq!(sig.status, Some(402));
    }
}
