//! Generation-config resolution for Parley.
//!
//! Resolves the effective [`GenerationConfig`](parley_core::GenerationConfig)
//! for a (user, persona) pair from three precedence levels, and caches the
//! result for a bounded time:
//!
//! 1. **Per-persona override** — the user's stored config for this persona
//! 2. **User default** — the user's stored global config
//! 3. **Persona defaults** — built into the persona
//!
//! Store failures never reach the caller; they degrade to persona defaults.

pub mod cache;
pub mod merge;
pub mod resolver;

pub use cache::{CacheOptions, CacheStats, TtlCache};
pub use merge::{apply_override, coerce_number};
pub use resolver::{ConfigResolver, FreeDefault, FREE_DEFAULT_KEY};
