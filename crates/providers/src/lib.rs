//! Completion-provider invocation for Parley.
//!
//! [`ResilientInvoker`] wraps any `parley_core::Provider` with bounded
//! retries, a global deadline, response validation and per-model stop
//! filtering. [`OpenAiCompatProvider`] is the HTTP backend.

pub mod classify;
pub mod openai_compat;
pub mod resilient;
pub mod stop_support;
pub mod validate;

pub use classify::{ErrorClass, ErrorSignature, classify};
pub use openai_compat::OpenAiCompatProvider;
pub use resilient::{
    AttemptOutcome, Completion, InvocationAttempt, ResilientInvoker, RetryPolicy, StopReason,
    diagnose_stop,
};
pub use stop_support::{STOP_PATTERNS_VERSION, StopSupport};
pub use validate::{InvalidResponse, validate_content};
