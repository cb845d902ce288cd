//! LLM provider abstractions for stepflow.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for runtime provider selection
//! - `pricing`: token cost computation against the configured rate table
//! - `selector`: heuristic model choice for steps using the `auto` model

pub mod box_provider;
pub mod pricing;
pub mod provider;
pub mod selector;

#[cfg(test)]
pub(crate) mod scripted;
