//! Long-term memory documents.
//!
//! Retrieval (vector search, ranking) happens elsewhere; this core only
//! needs the rendered text of each document and its token cost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single retrieved memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// The remembered text
    pub page_content: String,

    /// When the memory was written
    pub created_at: DateTime<Utc>,
}

impl MemoryDocument {
    pub fn new(page_content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            page_content: page_content.into(),
            created_at,
        }
    }

    /// The text injected into the prompt, prefixed with the creation date.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.created_at.format("%Y-%m-%d"), self.page_content)
    }
}

/// Parameters forwarded to the retrieval collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    pub user_id: String,
    pub persona_id: String,
    pub text: String,
    pub limit: usize,
    pub score_threshold: Option<f64>,
}

/// The retrieval collaborator. Returns documents already ordered by relevance.
#[async_trait]
pub trait MemoryRetriever: Send + Sync {
    async fn retrieve(&self, query: &MemoryQuery) -> Vec<MemoryDocument>;
}
