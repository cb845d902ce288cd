//! Scripted provider for engine tests.
//!
//! Replies are popped from a queue in call order; once the queue is empty
//! every call gets the fallback reply. All requests are recorded.

use std::collections::VecDeque;
use std::sync::Mutex;

use stepflow_types::llm::{CompletionRequest, CompletionResponse, LlmError, StopReason, Usage};

use super::provider::LlmProvider;

pub(crate) type Reply = Result<CompletionResponse, LlmError>;

pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(content: &str) -> Self {
        Self::new(Vec::new(), Ok(reply(content, 10, 20)))
    }

    pub(crate) fn always_failing(error: LlmError) -> Self {
        Self::new(Vec::new(), Err(error))
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// A successful completion with the given usage.
pub(crate) fn reply(content: &str, input_tokens: u32, output_tokens: u32) -> CompletionResponse {
    CompletionResponse {
        id: "resp-scripted".to_string(),
        content: content.to_string(),
        model: "scripted-model".to_string(),
        stop_reason: StopReason::EndTurn,
        usage: Usage {
            input_tokens,
            output_tokens,
        },
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        async move { next }
    }
}
