//! LlmProvider trait definition.
//!
//! This is the core abstraction that all LLM providers implement. It is the
//! single seam through which the engine reaches a model: step attempts,
//! LLM-judged criteria and context summaries all go through `complete`.

use stepflow_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for LLM provider backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). A provider
/// is expected to retry transient transport failures itself; an `Err` here
/// is a final outcome for the caller.
///
/// Implementations live in stepflow-infra (e.g., `OpenAiCompatibleProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "unbound").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
