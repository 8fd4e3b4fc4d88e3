//! # Parley Core
//!
//! Domain types, collaborator traits, and error definitions for the Parley
//! turn orchestrator. This crate has **no runtime dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (relational store, completion provider,
//! memory retrieval) is a trait here. Implementations live in their
//! respective crates, which keeps tests free to swap in stubs.

pub mod error;
pub mod generation;
pub mod memory;
pub mod message;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{InvocationError, ProviderError, StoreError};
pub use generation::{ConfigOverride, GenerationConfig, Resolution, ResolutionSource, StoredNumber};
pub use memory::{MemoryDocument, MemoryQuery, MemoryRetriever};
pub use message::{HistoryEntry, Message, Role};
pub use provider::{Content, ContentPart, Provider, ProviderRequest, ProviderResponse, ResponseMetadata};
pub use store::{ConfigStore, UserRecord};
