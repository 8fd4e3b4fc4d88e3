//! The per-turn pipeline.

use parley_config::AppConfig;
use parley_context::{AllocationInput, BudgetAllocator, BudgetPlan};
use parley_core::error::InvocationError;
use parley_core::generation::{GenerationConfig, Resolution};
use parley_core::memory::{MemoryDocument, MemoryQuery, MemoryRetriever};
use parley_core::message::HistoryEntry;
use parley_core::provider::ProviderRequest;
use parley_providers::{Completion, ResilientInvoker};
use parley_resolver::ConfigResolver;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memories recalled per turn when the config does not say.
const DEFAULT_MEMORY_LIMIT: usize = 5;

/// Supplies each persona's built-in generation defaults.
pub trait PersonaDefaults: Send + Sync {
    fn persona_defaults(&self, persona_id: &str) -> GenerationConfig;
}

impl PersonaDefaults for AppConfig {
    fn persona_defaults(&self, persona_id: &str) -> GenerationConfig {
        self.persona(persona_id)
    }
}

/// Everything needed to answer one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    /// `None` or empty for anonymous users
    pub user_id: Option<String>,
    pub persona_id: String,
    /// Fully rendered system prompt
    pub system_prompt: String,
    /// The user's current message
    pub message: String,
    /// Prior turns, oldest first
    pub history: Vec<HistoryEntry>,
    /// Pre-fetched memories. `None` asks the configured retriever.
    pub memories: Option<Vec<MemoryDocument>>,
    /// Use the provider-wide free default instead of per-user settings
    pub use_free_default: bool,
}

/// The answer plus everything that went into it.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutput {
    pub completion: Completion,
    pub resolution: Resolution,
    pub plan: BudgetPlan,
    /// The input history with every token count filled in, ready to persist
    pub history: Vec<HistoryEntry>,
}

/// Runs turns: resolve config → allocate budget → assemble → invoke.
pub struct TurnRunner {
    resolver: Arc<ConfigResolver>,
    personas: Arc<dyn PersonaDefaults>,
    allocator: BudgetAllocator,
    invoker: ResilientInvoker,
    memory: Option<Arc<dyn MemoryRetriever>>,
}

impl TurnRunner {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        personas: Arc<dyn PersonaDefaults>,
        invoker: ResilientInvoker,
    ) -> Self {
        Self {
            resolver,
            personas,
            allocator: BudgetAllocator::heuristic(),
            invoker,
            memory: None,
        }
    }

    /// Attach a memory retriever for turns that do not bring their own memories.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryRetriever>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Resolve the effective config for this turn.
    pub async fn resolve(&self, input: &TurnInput) -> Resolution {
        let defaults = self.personas.persona_defaults(&input.persona_id);

        if input.use_free_default {
            if let Some(free) = self.resolver.resolve_free_default().await {
                return free.apply(&defaults);
            }
            debug!("No free default configured; resolving normally");
        }

        self.resolver
            .resolve(input.user_id.as_deref(), &input.persona_id, &defaults)
            .await
    }

    async fn recall(&self, input: &TurnInput, config: &GenerationConfig) -> Vec<MemoryDocument> {
        if let Some(memories) = &input.memories {
            return memories.clone();
        }
        let (Some(memory), Some(user_id)) = (
            &self.memory,
            input.user_id.as_deref().filter(|id| !id.is_empty()),
        ) else {
            return Vec::new();
        };

        let limit = config
            .memory_limit
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_MEMORY_LIMIT);
        if limit == 0 {
            return Vec::new();
        }

        let documents = memory
            .retrieve(&MemoryQuery {
                user_id: user_id.to_string(),
                persona_id: input.persona_id.clone(),
                text: input.message.clone(),
                limit,
                score_threshold: config.memory_score_threshold,
            })
            .await;
        debug!(count = documents.len(), "Recalled memories");
        documents
    }

    pub async fn run(&self, input: TurnInput) -> Result<TurnOutput, InvocationError> {
        self.run_with_cancel(input, &CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        mut input: TurnInput,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, InvocationError> {
        let resolution = self.resolve(&input).await;
        let config = &resolution.config;
        info!(
            user_id = input.user_id.as_deref().unwrap_or("-"),
            persona_id = %input.persona_id,
            source = %resolution.source,
            model = %config.model,
            "Starting turn"
        );

        let memories = self.recall(&input, config).await;

        let plan = self.allocator.allocate(AllocationInput {
            window_size: config.context_window as usize,
            system_prompt: &input.system_prompt,
            current_turn: &input.message,
            memories: &memories,
            history: &mut input.history,
        });
        if plan.is_degraded() {
            warn!(
                overflow_tokens = plan.overflow_tokens,
                window = plan.window_size,
                "Sending turn with an overflowing context"
            );
        }

        let messages = plan
            .clone()
            .into_messages(&input.system_prompt, &input.message);
        let request = ProviderRequest::from_config(config, messages);

        let completion = self.invoker.invoke_with_cancel(request, cancel).await?;

        Ok(TurnOutput {
            completion,
            resolution,
            plan,
            history: input.history,
        })
    }
}
