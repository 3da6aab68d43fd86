//! The arena execution engine.
//!
//! Given a pre-validated configuration, the engine expands filters into a
//! flat run plan ([`PlanBuilder`]), executes the plan under a bounded
//! concurrency cap ([`RunScheduler`]), routes each run to a scripted,
//! duplex, or replay-eval conversation ([`CompositeConversation`]), and
//! persists everything through the state store, from which run results
//! are reconstructed.

pub mod adapters;
pub mod assertions;
pub mod composite;
pub mod duplex;
pub mod eval;
pub mod evalhook;
pub mod harness;
pub mod media;
pub mod plan;
pub mod prompts;
pub mod scheduler;
pub mod scripted;
pub mod selfplay;
pub mod tts;
pub mod turn;

pub use composite::{CompositeConversation, ConversationRequest};
pub use duplex::DuplexConversation;
pub use eval::EvalConversation;
pub use evalhook::{EvalContext, EvalHandler, PackEvalHook, PairedToolCall};
pub use harness::{Harness, HarnessBuilder};
pub use plan::{PlanBuilder, PlanFilter};
pub use scheduler::RunScheduler;
pub use scripted::ScriptedConversation;
pub use turn::{TurnExecutor, TurnRequest};
