//! Shared domain types for stepflow.
//!
//! Workflow and step definitions, execution records, LLM request/response
//! shapes, monetary amounts, configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod cost;
pub mod error;
pub mod execution;
pub mod llm;
pub mod workflow;
