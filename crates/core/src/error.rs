//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use std::time::Duration;
use thiserror::Error;

// --- Bounded context errors ---

/// Failure of a single call to a completion provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Network error: {message}")]
    Network {
        /// System-level error code when one is known (`ECONNRESET`, `ENOTFOUND`, ...).
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    /// Shorthand for a network error carrying a system error code.
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

/// Failures of the relational store. These never escape the resolver.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Store migration failed: {0}")]
    MigrationFailed(String),
}

/// The single user-visible failure of a resilient invocation.
///
/// Every variant names the number of attempts that were made.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    /// A permanent rejection (credentials, billing, rate/daily limits).
    #[error("invocation failed after {attempts} attempt(s): fatal provider error: {source}")]
    Fatal { attempts: u32, source: ProviderError },

    /// An error that matched neither the fatal nor the transient table.
    #[error("invocation failed after {attempts} attempt(s): non-retryable error: {source}")]
    NonRetryable { attempts: u32, source: ProviderError },

    /// Every attempt failed transiently or produced an invalid response.
    #[error("invocation failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The global deadline passed before another attempt could start.
    #[error("global timeout exceeded after {attempts} attempt(s) ({elapsed:?} elapsed)")]
    GlobalTimeout { attempts: u32, elapsed: Duration },
}

impl InvocationError {
    /// Number of provider calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::GlobalTimeout { attempts, .. } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 402,
            message: "Payment required".into(),
        };
        assert!(err.to_string().contains("402"));
        assert!(err.to_string().contains("Payment required"));
    }

    #[test]
    fn invocation_errors_name_attempt_count() {
        let exhausted = InvocationError::Exhausted {
            attempts: 3,
            last_error: "empty response".into(),
        };
        assert!(exhausted.to_string().contains("after 3 attempt"));
        assert_eq!(exhausted.attempts(), 3);

        let timeout = InvocationError::GlobalTimeout {
            attempts: 2,
            elapsed: Duration::from_secs(121),
        };
        assert!(timeout.to_string().contains("global timeout exceeded"));
        assert!(timeout.to_string().contains("2 attempt"));
    }

    #[test]
    fn top_level_error_wraps_invocation() {
        let err: Error = InvocationError::Fatal {
            attempts: 1,
            source: ProviderError::AuthenticationFailed("bad key".into()),
        }
        .into();
        assert!(err.to_string().contains("bad key"));
    }
}
