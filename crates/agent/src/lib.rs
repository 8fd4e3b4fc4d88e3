//! The turn pipeline — the heart of Parley.
//!
//! Each turn follows the same fixed sequence:
//!
//! 1. **Resolve** the effective generation config for (user, persona)
//! 2. **Recall** long-term memories, unless the caller brought them
//! 3. **Budget** the context window and trim history to fit
//! 4. **Assemble** the final message list
//! 5. **Invoke** the provider with retries, deadline and validation

pub mod turn;

pub use turn::{PersonaDefaults, TurnInput, TurnOutput, TurnRunner};
