//! Infrastructure layer for stepflow.
//!
//! Contains implementations of the ports defined in `stepflow-core`:
//! SQLite storage for workflows and executions, the OpenAI-compatible LLM
//! provider, and the global config loader.

pub mod config;
pub mod llm;
pub mod sqlite;
