//! History budgeting against a fixed context window.
//!
//! # Algorithm
//!
//! 1. `used = tokens(system) + tokens(current turn) + tokens(memories)`
//! 2. `history_budget = window - used`, floored at zero
//! 3. Walk history newest → oldest, summing each entry's count (cached if
//!    present, computed and stored otherwise). Keep entries while the
//!    running total is within the budget; stop at the first that is not.
//!
//! Retained entries are a contiguous suffix of the history, returned in
//! chronological order. An entry that exactly fills the budget is kept.

use crate::token::{HeuristicCounter, TokenCounter};
use parley_core::memory::MemoryDocument;
use parley_core::message::{HistoryEntry, Message};
use serde::Serialize;
use tracing::{debug, warn};

/// First line of the memory system message.
pub const MEMORY_HEADER: &str = "Relevant memories:";

/// Everything the allocator looks at for one turn.
pub struct AllocationInput<'a> {
    /// The model's context window, in tokens
    pub window_size: usize,
    /// Fully rendered system prompt
    pub system_prompt: &'a str,
    /// Fully rendered current user turn
    pub current_turn: &'a str,
    /// Retrieved memories, in the order they should appear
    pub memories: &'a [MemoryDocument],
    /// Prior turns, oldest first. Missing token counts are filled in.
    pub history: &'a mut [HistoryEntry],
}

/// The outcome of one allocation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetPlan {
    pub window_size: usize,
    pub system_tokens: usize,
    pub current_tokens: usize,
    pub memory_tokens: usize,
    /// Tokens of the retained history
    pub history_tokens: usize,
    /// What was left for history after the fixed parts
    pub history_budget: usize,
    /// Oldest entries that did not fit
    pub dropped_history: usize,
    /// Entries whose count had to be computed during this pass
    pub recomputed_counts: usize,
    /// How far the fixed parts alone exceed the window (0 when they fit)
    pub overflow_tokens: usize,
    /// Retained history, oldest first
    pub history: Vec<HistoryEntry>,
    pub memories: Vec<MemoryDocument>,
}

impl BudgetPlan {
    /// Tokens taken by the system prompt, current turn and memories.
    pub fn fixed_tokens(&self) -> usize {
        self.system_tokens + self.current_tokens + self.memory_tokens
    }

    pub fn total_tokens(&self) -> usize {
        self.fixed_tokens() + self.history_tokens
    }

    /// True when the window could not even hold the fixed parts.
    ///
    /// The plan is still usable; whether to send it is the caller's call.
    pub fn is_degraded(&self) -> bool {
        self.overflow_tokens > 0
    }

    /// The memory block injected as a system message, if there are memories.
    pub fn render_memories(&self) -> Option<String> {
        render_memory_block(&self.memories)
    }

    /// Assemble the final message list:
    /// system prompt, memories, retained history, then the current turn.
    pub fn into_messages(self, system_prompt: &str, current_turn: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 3);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        if let Some(block) = self.render_memories() {
            messages.push(Message::system(block));
        }
        messages.extend(self.history.iter().map(HistoryEntry::to_message));
        messages.push(Message::user(current_turn));
        messages
    }
}

fn render_memory_block(memories: &[MemoryDocument]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let mut block = String::from(MEMORY_HEADER);
    for doc in memories {
        block.push('\n');
        block.push_str(&doc.render());
    }
    Some(block)
}

/// The budget allocator. Stateless apart from its counter; reuse freely.
#[derive(Debug, Clone, Default)]
pub struct BudgetAllocator<C = HeuristicCounter> {
    counter: C,
}

impl BudgetAllocator<HeuristicCounter> {
    /// An allocator using the character heuristic.
    pub fn heuristic() -> Self {
        Self::new(HeuristicCounter)
    }
}

impl<C: TokenCounter> BudgetAllocator<C> {
    pub fn new(counter: C) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Price the memory block the way [`BudgetPlan::into_messages`] will render it.
    pub fn memory_tokens(&self, memories: &[MemoryDocument]) -> usize {
        if memories.is_empty() {
            return 0;
        }
        self.counter.count(MEMORY_HEADER)
            + memories
                .iter()
                .map(|doc| self.counter.count(&doc.render()))
                .sum::<usize>()
    }

    /// Run one allocation pass. Never fails; an undersized window yields a
    /// plan with no history and a non-zero `overflow_tokens`.
    pub fn allocate(&self, input: AllocationInput<'_>) -> BudgetPlan {
        let system_tokens = self.counter.count(input.system_prompt);
        let current_tokens = self.counter.count(input.current_turn);
        let memory_tokens = self.memory_tokens(input.memories);
        let used = system_tokens + current_tokens + memory_tokens;

        let history_budget = input.window_size.saturating_sub(used);
        let overflow_tokens = used.saturating_sub(input.window_size);

        let total = input.history.len();
        let mut kept_from = total;
        let mut history_tokens = 0;
        let mut recomputed_counts = 0;

        if overflow_tokens > 0 {
            warn!(
                window = input.window_size,
                system_tokens,
                current_tokens,
                memory_tokens,
                overflow_tokens,
                "Context window smaller than system prompt, turn and memories; dropping all history"
            );
        } else {
            for (idx, entry) in input.history.iter_mut().enumerate().rev() {
                let tokens = match entry.token_count {
                    Some(cached) => cached,
                    None => {
                        let computed = self.counter.count(&entry.content);
                        entry.token_count = Some(computed);
                        recomputed_counts += 1;
                        computed
                    }
                };
                if history_tokens + tokens > history_budget {
                    break;
                }
                history_tokens += tokens;
                kept_from = idx;
            }
        }

        let history = input.history[kept_from..].to_vec();
        let dropped_history = total - history.len();

        debug!(
            window = input.window_size,
            used,
            history_budget,
            kept = history.len(),
            dropped = dropped_history,
            recomputed = recomputed_counts,
            "Allocated context budget"
        );

        BudgetPlan {
            window_size: input.window_size,
            system_tokens,
            current_tokens,
            memory_tokens,
            history_tokens,
            history_budget,
            dropped_history,
            recomputed_counts,
            overflow_tokens,
            history,
            memories: input.memories.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parley_core::message::Role;
    use std::sync::Mutex;

    fn cached_history(n: usize, tokens: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                HistoryEntry::new(role, format!("turn {i}")).with_token_count(tokens)
            })
            .collect()
    }

    // 8000 chars → 2000 tokens, 2000 chars → 500 tokens
    fn system() -> String {
        "s".repeat(8000)
    }

    fn current() -> String {
        "c".repeat(2000)
    }

    #[test]
    fn everything_fits() {
        let (system, current) = (system(), current());
        let mut history = cached_history(100, 50);
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 8000,
            system_prompt: &system,
            current_turn: &current,
            memories: &[],
            history: &mut history,
        });

        assert_eq!(plan.system_tokens, 2000);
        assert_eq!(plan.current_tokens, 500);
        assert_eq!(plan.history_budget, 5500);
        assert_eq!(plan.history.len(), 100);
        assert_eq!(plan.history_tokens, 5000);
        assert_eq!(plan.dropped_history, 0);
        assert!(!plan.is_degraded());
    }

    #[test]
    fn keeps_newest_suffix_that_fits() {
        let (system, current) = (system(), current());
        let mut history = cached_history(200, 100);
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 8000,
            system_prompt: &system,
            current_turn: &current,
            memories: &[],
            history: &mut history,
        });

        // 55 × 100 = 5500 exactly fills the budget; the 56th does not fit
        assert_eq!(plan.history.len(), 55);
        assert_eq!(plan.dropped_history, 145);
        assert_eq!(plan.history_tokens, 5500);
        assert_eq!(plan.history.first().unwrap().content, "turn 145");
        assert_eq!(plan.history.last().unwrap().content, "turn 199");
        assert!(plan.total_tokens() <= plan.window_size);
    }

    #[test]
    fn stops_at_first_overflowing_entry() {
        let mut history = vec![
            HistoryEntry::new(Role::User, "old").with_token_count(1),
            HistoryEntry::new(Role::Assistant, "big").with_token_count(50),
            HistoryEntry::new(Role::User, "new").with_token_count(5),
        ];
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 10,
            system_prompt: "",
            current_turn: "",
            memories: &[],
            history: &mut history,
        });
        // "old" would fit on its own but is older than the entry that overflowed
        assert_eq!(plan.history.len(), 1);
        assert_eq!(plan.history[0].content, "new");
    }

    struct RecordingCounter {
        counted: Mutex<Vec<String>>,
    }

    impl TokenCounter for RecordingCounter {
        fn count(&self, text: &str) -> usize {
            self.counted.lock().unwrap().push(text.to_string());
            text.len()
        }
    }

    #[test]
    fn cached_counts_are_trusted() {
        let counter = RecordingCounter {
            counted: Mutex::new(Vec::new()),
        };
        let allocator = BudgetAllocator::new(&counter);
        let mut history = vec![
            HistoryEntry::new(Role::User, "cached").with_token_count(999),
            HistoryEntry::new(Role::Assistant, "fresh one"),
            HistoryEntry::new(Role::User, "fresh two"),
        ];

        let plan = allocator.allocate(AllocationInput {
            window_size: 10_000,
            system_prompt: "sys",
            current_turn: "hi",
            memories: &[],
            history: &mut history,
        });

        assert_eq!(plan.recomputed_counts, 2);
        // The cached count is used verbatim even though it is "wrong"
        assert_eq!(plan.history_tokens, 999 + 9 + 9);
        assert_eq!(history[1].token_count, Some(9));
        assert_eq!(history[2].token_count, Some(9));

        let counted = counter.counted.lock().unwrap().clone();
        assert_eq!(counted, vec!["sys", "hi", "fresh two", "fresh one"]);
    }

    #[test]
    fn second_pass_is_identical_without_recounting() {
        let allocator = BudgetAllocator::heuristic();
        let mut history = vec![
            HistoryEntry::new(Role::User, "a".repeat(40)),
            HistoryEntry::new(Role::Assistant, "b".repeat(40)),
        ];
        let run = |history: &mut [HistoryEntry]| {
            allocator.allocate(AllocationInput {
                window_size: 15,
                system_prompt: "",
                current_turn: "",
                memories: &[],
                history,
            })
        };

        let first = run(&mut history);
        let second = run(&mut history);
        assert_eq!(first.recomputed_counts, 2);
        assert_eq!(second.recomputed_counts, 0);
        assert_eq!(first.history, second.history);
        assert_eq!(first.history_tokens, second.history_tokens);
    }

    #[test]
    fn undersized_window_degrades_to_empty_history() {
        let (system, current) = (system(), current());
        let mut history = vec![HistoryEntry::new(Role::User, "hello")];
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 1000,
            system_prompt: &system,
            current_turn: &current,
            memories: &[],
            history: &mut history,
        });

        assert!(plan.is_degraded());
        assert_eq!(plan.overflow_tokens, 1500);
        assert_eq!(plan.history_budget, 0);
        assert!(plan.history.is_empty());
        assert_eq!(plan.dropped_history, 1);
        assert_eq!(plan.recomputed_counts, 0);
    }

    #[test]
    fn memories_count_against_the_window() {
        let memories = vec![MemoryDocument::new(
            "Likes green tea",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )];
        let allocator = BudgetAllocator::heuristic();
        let expected = allocator.memory_tokens(&memories);
        assert!(expected > 0);

        let mut history = cached_history(10, 10);
        let plan = allocator.allocate(AllocationInput {
            window_size: 50 + expected,
            system_prompt: "",
            current_turn: "",
            memories: &memories,
            history: &mut history,
        });
        assert_eq!(plan.memory_tokens, expected);
        assert_eq!(plan.history.len(), 5);
    }

    #[test]
    fn messages_are_assembled_in_order() {
        let memories = vec![MemoryDocument::new(
            "Likes green tea",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )];
        let mut history = vec![
            HistoryEntry::new(Role::User, "hi"),
            HistoryEntry::new(Role::Assistant, "hello!"),
        ];
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 1000,
            system_prompt: "You are Luna.",
            current_turn: "what do I like?",
            memories: &memories,
            history: &mut history,
        });

        let messages = plan.into_messages("You are Luna.", "what do I like?");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(
            messages[1].content,
            "Relevant memories:\n[2024-01-02] Likes green tea"
        );
        assert_eq!(messages[4].content, "what do I like?");
    }

    #[test]
    fn no_memory_message_without_memories() {
        let mut history = Vec::new();
        let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
            window_size: 100,
            system_prompt: "sys",
            current_turn: "hi",
            memories: &[],
            history: &mut history,
        });
        assert!(plan.render_memories().is_none());
        assert_eq!(plan.into_messages("sys", "hi").len(), 2);
    }
}
