//! Context passing between consecutive steps.
//!
//! `extract_context` is pure. The `summary` mode needs a model call, so it
//! passes the output through here and the step runner calls
//! [`summarize_for_context`] instead.

use stepflow_types::config::GlobalConfig;
use stepflow_types::llm::CompletionRequest;
use stepflow_types::workflow::ContextMode;

use super::criteria::extract_code_blocks;
use crate::llm::provider::LlmProvider;

/// Appended to the output when summarization fails and it is cut short.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Derive the next step's input from a completed step's output.
pub fn extract_context(output: &str, mode: &ContextMode) -> String {
    match mode {
        ContextMode::Full | ContextMode::Summary => output.to_string(),
        ContextMode::CodeOnly => {
            let blocks = extract_code_blocks(output);
            if blocks.is_empty() {
                return output.to_string();
            }
            blocks
                .iter()
                .map(|block| format!("```\n{block}\n```"))
                .collect::<Vec<_>>()
                .join("\n\n")
        }
        ContextMode::Custom { template: None } => output.to_string(),
        ContextMode::Custom {
            template: Some(template),
        } if template.is_empty() => output.to_string(),
        ContextMode::Custom {
            template: Some(template),
        } => {
            let code = extract_code_blocks(output).join("\n");
            template.replace("{{output}}", output).replace("{{code}}", &code)
        }
    }
}

/// Frame the previous step's context ahead of this step's prompt.
pub fn frame_prompt(input_context: Option<&str>, prompt: &str) -> String {
    match input_context {
        Some(context) => {
            format!("Context from previous step:\n\n{context}\n\n---\n\nYour task:\n{prompt}")
        }
        None => prompt.to_string(),
    }
}

pub fn summary_prompt(content: &str) -> String {
    format!(
        "Summarize the following content concisely, preserving key information, \
         code snippets, and important details:\n\n{content}\n\n\
         Provide a clear, structured summary that captures the essential points."
    )
}

/// First `max_chars` characters plus [`TRUNCATION_MARKER`], or the content
/// unchanged when it already fits.
pub fn truncate_for_context(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content.to_string(),
    }
}

/// Summarize `content` with the configured summary model. A failed call
/// degrades to a truncated copy of the content.
#[tracing::instrument(skip_all, fields(model = %config.models.summary_model, chars = content.len()))]
pub async fn summarize_for_context<P: LlmProvider>(
    provider: &P,
    config: &GlobalConfig,
    content: &str,
) -> String {
    let request = CompletionRequest::user_prompt(
        &config.models.summary_model,
        &summary_prompt(content),
        config.execution.summary_max_tokens,
        config.execution.summary_temperature,
    );

    match provider.complete(&request).await {
        Ok(response) => response.content,
        Err(e) => {
            tracing::warn!(error = %e, "summarization failed, passing truncated output");
            truncate_for_context(content, config.execution.summary_fallback_chars)
        }
    }
}
