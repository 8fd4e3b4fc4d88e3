//! Context-window budgeting for Parley.
//!
//! Decides how much conversation history fits in a model's context window
//! next to the system prompt, the current turn and retrieved memories, then
//! assembles the final message list.
//!
//! | Part | Trim strategy |
//! |------|---------------|
//! | System prompt | Never trimmed |
//! | Current turn | Never trimmed |
//! | Memories | Never trimmed; overflow is reported on the plan |
//! | History | Oldest turns dropped first |

pub mod allocator;
pub mod token;

pub use allocator::{AllocationInput, BudgetAllocator, BudgetPlan, MEMORY_HEADER};
pub use token::{HeuristicCounter, TokenCounter, estimate_tokens};
