//! Workflow engine core: criteria, context passing, and durable sequential execution.
//!
//! - `definition` -- JSON/YAML documents, validation, lint
//! - `criteria` -- Output checks, including the LLM judge
//! - `context` -- Context extraction and prompt framing between steps
//! - `retry` -- Attempt budget and backoff policy
//! - `checkpoint` -- Durable checkpoint manager for execution state
//! - `step_runner` -- Per-step attempt loop
//! - `executor` -- Sequential fail-fast workflow runner
//! - `launcher` -- Background execution with cancellation

pub mod checkpoint;
pub mod context;
pub mod criteria;
pub mod definition;
pub mod executor;
pub mod launcher;
pub mod retry;
pub mod step_runner;
