//! Decision Engine
//!
//! Runs the bounded tool-calling conversation between a language model and the
//! eight callable trading functions, and keeps the decision audit log.

pub mod confidence;
pub mod decision_log;
pub mod engine;
pub mod llm;
pub mod openai;
pub mod prompts;
pub mod scripted;
pub mod tools;

pub use confidence::{confidence_score, ConfidenceLevel};
pub use decision_log::{DecisionLog, InMemoryDecisionLog};
pub use engine::{DecisionContext, DecisionEngine, DecisionOutcome};
pub use llm::{
    ChatMessage, CompletionRequest, LlmClient, LlmConfig, LlmResponse, Role, ToolCallRequest,
    ToolDefinition, UnavailableLlm,
};
pub use openai::OpenAiCompatibleClient;
pub use scripted::ScriptedLlm;
pub use tools::TradingFunctions;
