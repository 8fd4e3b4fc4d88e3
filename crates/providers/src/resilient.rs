//! Resilient invocation: bounded retries with backoff under a global deadline.
//!
//! Attempts run strictly one after another. Each attempt:
//!
//! 1. Fails with [`InvocationError::GlobalTimeout`] if the deadline has passed
//! 2. Calls the provider under `min(call_timeout, time left)`
//! 3. Validates the reply; an unusable reply counts as a transient failure
//! 4. On failure, classifies it: fatal and unknown errors stop the loop,
//!    transient ones sleep `base_delay * 2^(n-1)` and go again
//!
//! Caller cancellation and per-call timeouts both surface as transient
//! errors, so they are retried until the attempt or time budget runs out.

use crate::classify::{ErrorClass, classify};
use crate::stop_support::StopSupport;
use crate::validate::validate_content;
use parley_config::InvocationConfig;
use parley_core::error::{InvocationError, ProviderError};
use parley_core::provider::{Content, Provider, ProviderRequest, ResponseMetadata};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempt and time budget for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Wall-clock budget across all attempts and delays
    pub global_deadline: Duration,
    /// Upper bound for a single provider call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&InvocationConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &InvocationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            global_deadline: config.global_deadline(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableError { error: String },
    /// Fatal or unclassified; ends the invocation
    FatalError { error: String },
    InvalidResponse { reason: String },
}

/// One provider call made during an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationAttempt {
    /// 1-based attempt number
    pub index: u32,
    /// Time since the invocation began when this attempt started
    pub started_after: Duration,
    pub outcome: AttemptOutcome,
    /// Delay slept before the next attempt
    pub backoff: Option<Duration>,
}

/// Which condition ended generation. Observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StopReason {
    /// The provider reported the stop value that fired
    Provider(String),
    /// The provider reported a natural stop, but the reply lacks the
    /// expected terminator, so one of the other stop sequences fired
    InferredStopSequence,
    Natural,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Provider(value) => write!(f, "provider stop value {value:?}"),
            StopReason::InferredStopSequence => write!(f, "inferred stop sequence"),
            StopReason::Natural => write!(f, "natural completion"),
        }
    }
}

/// Work out which stop condition ended generation.
pub fn diagnose_stop(
    metadata: Option<&ResponseMetadata>,
    text: &str,
    sent_stop: Option<&[String]>,
    terminator: Option<&str>,
) -> StopReason {
    if let Some(value) = metadata
        .and_then(|m| m.stop_value.as_deref())
        .filter(|v| !v.is_empty())
    {
        return StopReason::Provider(value.to_string());
    }

    let natural_stop = metadata
        .and_then(|m| m.finish_reason.as_deref())
        .is_some_and(|r| r == "stop");

    if let (true, Some(terminator), Some(stop)) = (natural_stop, terminator, sent_stop) {
        let other_sequences = stop.iter().any(|s| s != terminator);
        if other_sequences && !text.trim_end().ends_with(terminator) {
            return StopReason::InferredStopSequence;
        }
    }

    StopReason::Natural
}

/// A validated reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Visible text of the reply
    pub text: String,
    pub content: Content,
    pub metadata: Option<ResponseMetadata>,
    pub stop_reason: StopReason,
    pub attempts: Vec<InvocationAttempt>,
}

impl Completion {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Wraps a [`Provider`] with retry, timeout, validation and stop filtering.
pub struct ResilientInvoker {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    stop_support: StopSupport,
    terminator: Option<String>,
}

impl ResilientInvoker {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            stop_support: StopSupport::default(),
            terminator: None,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &InvocationConfig) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from_config(config),
            stop_support: StopSupport::from_config(config),
            terminator: config.terminator.clone(),
        }
    }

    pub fn with_stop_support(mut self, stop_support: StopSupport) -> Self {
        self.stop_support = stop_support;
        self
    }

    /// The marker a complete reply is expected to end with.
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = Some(terminator.into());
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn invoke(&self, request: ProviderRequest) -> Result<Completion, InvocationError> {
        self.invoke_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`invoke`](Self::invoke), but an in-flight call is aborted when
    /// `cancel` fires. The abort is retried like any other transient error.
    pub async fn invoke_with_cancel(
        &self,
        mut request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, InvocationError> {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let deadline = self.policy.global_deadline;

        self.stop_support.apply(&mut request);
        let sent_stop = request.stop.clone();

        let mut attempts: Vec<InvocationAttempt> = Vec::new();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                warn!(
                    attempts = attempt - 1,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Global invocation deadline exceeded"
                );
                return Err(InvocationError::GlobalTimeout {
                    attempts: attempt - 1,
                    elapsed,
                });
            }

            let call_timeout = self.policy.call_timeout.min(deadline - elapsed);
            let mut call = request.clone();
            call.timeout = Some(call_timeout);

            info!(
                provider = %self.provider.name(),
                model = %request.model,
                attempt,
                max_attempts,
                "Invoking provider"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Aborted("cancelled by caller".into())),
                r = tokio::time::timeout(call_timeout, self.provider.complete(call)) => match r {
                    Ok(r) => r,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "no response within {}ms",
                        call_timeout.as_millis()
                    ))),
                },
            };

            let mut record = InvocationAttempt {
                index: attempt,
                started_after: elapsed,
                outcome: AttemptOutcome::Success,
                backoff: None,
            };

            match result {
                Ok(response) => match validate_content(&response.content) {
                    Ok(()) => {
                        attempts.push(record);
                        let text = response.content.to_text();
                        let stop_reason = diagnose_stop(
                            response.metadata.as_ref(),
                            &text,
                            sent_stop.as_deref(),
                            self.terminator.as_deref(),
                        );
                        info!(
                            model = %request.model,
                            attempts = attempt,
                            stop_reason = %stop_reason,
                            "Invocation complete"
                        );
                        return Ok(Completion {
                            text,
                            content: response.content,
                            metadata: response.metadata,
                            stop_reason,
                            attempts,
                        });
                    }
                    Err(invalid) => {
                        warn!(attempt, reason = %invalid, "Rejected provider response");
                        last_error = format!("invalid response: {invalid}");
                        record.outcome = AttemptOutcome::InvalidResponse {
                            reason: invalid.to_string(),
                        };
                    }
                },
                Err(err) => match classify(&err) {
                    ErrorClass::Fatal => {
                        warn!(attempt, error = %err, "Fatal provider error; not retrying");
                        record.outcome = AttemptOutcome::FatalError {
                            error: err.to_string(),
                        };
                        attempts.push(record);
                        debug!(trail = ?attempts, "Invocation attempts");
                        return Err(InvocationError::Fatal {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    ErrorClass::NonRetryable => {
                        warn!(attempt, error = %err, "Unclassified provider error; not retrying");
                        record.outcome = AttemptOutcome::FatalError {
                            error: err.to_string(),
                        };
                        attempts.push(record);
                        debug!(trail = ?attempts, "Invocation attempts");
                        return Err(InvocationError::NonRetryable {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    ErrorClass::Transient => {
                        warn!(attempt, error = %err, "Transient provider error");
                        last_error = err.to_string();
                        record.outcome = AttemptOutcome::RetryableError {
                            error: err.to_string(),
                        };
                    }
                },
            }

            if attempt < max_attempts {
                let remaining = deadline.saturating_sub(started.elapsed());
                let delay = self.policy.backoff_for(attempt).min(remaining);
                record.backoff = Some(delay);
                attempts.push(record);

                info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                attempts.push(record);
            }
        }

        warn!(attempts = max_attempts, error = %last_error, "Invocation attempts exhausted");
        debug!(trail = ?attempts, "Invocation attempts");
        Err(InvocationError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
