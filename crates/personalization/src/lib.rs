//! Personalization — return-probability estimation, tone adjustment,
//! message generation and deterministic A/B assignment.
//!
//! Pure over its inputs: no store access, no queue state.

pub mod client;
pub mod context;
pub mod engine;

pub use client::ChatCompletionClient;
pub use context::UserContext;
pub use engine::{
    adjust_tone, build_prompt, personalizer_from_config, select_variant, CompletionClient,
    HeuristicPersonalizer, MessageSpec, ModelPersonalizer, Personalizer, StubCompletionClient,
};
