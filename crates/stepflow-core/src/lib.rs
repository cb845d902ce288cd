//! Execution engine and repository trait definitions for stepflow.
//!
//! This crate defines the "ports" (the `LlmProvider` and
//! `WorkflowRepository` traits) that the infrastructure layer implements,
//! plus the engine built on top of them: criteria evaluation, context
//! extraction, the step and workflow runners, and definition documents.
//! It depends only on `stepflow-types`, never on `stepflow-infra`.

pub mod llm;
pub mod repository;
pub mod workflow;
