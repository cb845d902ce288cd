//! Global configuration types for stepflow.
//!
//! `GlobalConfig` is the top-level `config.toml`: provider connection,
//! model tiers for auto-selection, the pricing table, and execution pacing.
//! It is loaded once and passed explicitly to every component that needs it.

use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section and field has a default, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

// ---------------------------------------------------------------------------
// [provider]
// ---------------------------------------------------------------------------

/// Connection settings for the OpenAI-compatible model gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Total transport attempts for transient HTTP failures.
    pub max_transport_attempts: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "unbound".to_string(),
            base_url: "https://api.getunbound.ai/v1".to_string(),
            api_key_env: "STEPFLOW_API_KEY".to_string(),
            request_timeout_secs: 180,
            max_transport_attempts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// [models]
// ---------------------------------------------------------------------------

/// Model tiers and the heuristics that pick between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model assigned to imported steps that name none.
    pub default_model: String,
    pub complex_model: String,
    pub simple_model: String,
    pub judge_model: String,
    pub summary_model: String,
    /// Prompts longer than this many characters count as complex.
    pub complexity_prompt_chars: usize,
    pub complexity_keywords: Vec<String>,
    pub catalog: Vec<ModelInfo>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let keywords = [
            "code",
            "function",
            "class",
            "implement",
            "algorithm",
            "analyze",
            "reason",
            "explain why",
            "step by step",
            "json schema",
            "validate",
            "debug",
            "optimize",
        ];
        Self {
            default_model: "kimi-k2p5".to_string(),
            complex_model: "kimi-k2p5".to_string(),
            simple_model: "kimi-k2-instruct-0905".to_string(),
            judge_model: "kimi-k2p5".to_string(),
            summary_model: "kimi-k2p5".to_string(),
            complexity_prompt_chars: 1000,
            complexity_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            catalog: vec![
                ModelInfo::new(
                    crate::workflow::AUTO_MODEL,
                    "Auto Select",
                    "Automatically picks the best model for the task",
                ),
                ModelInfo::new(
                    "kimi-k2p5",
                    "Kimi K2.5",
                    "262k context, images, extended thinking",
                ),
                ModelInfo::new(
                    "kimi-k2-instruct-0905",
                    "Kimi K2 Instruct",
                    "256k context, instruction-following",
                ),
            ],
        }
    }
}

/// A selectable model, as listed by `sflow models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ModelInfo {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// [pricing]
// ---------------------------------------------------------------------------

/// Per-model token rates in USD per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub default_input_per_million: f64,
    pub default_output_per_million: f64,
    pub models: Vec<ModelPricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_input_per_million: 0.50,
            default_output_per_million: 1.50,
            models: vec![
                ModelPricing::new("kimi-k2p5", 0.15, 0.60),
                ModelPricing::new("kimi-k2-instruct-0905", 0.15, 0.60),
            ],
        }
    }
}

impl PricingConfig {
    /// Rates for `model`, falling back to the default rate.
    pub fn rates_for(&self, model: &str) -> (f64, f64) {
        self.models
            .iter()
            .find(|p| p.model == model)
            .map(|p| (p.input_per_million, p.output_per_million))
            .unwrap_or((self.default_input_per_million, self.default_output_per_million))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn new(model: &str, input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            model: model.to_string(),
            input_per_million,
            output_per_million,
        }
    }
}

// ---------------------------------------------------------------------------
// [execution]
// ---------------------------------------------------------------------------

/// Token budgets, temperatures and pacing for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub step_max_tokens: u32,
    pub step_temperature: f64,
    pub judge_max_tokens: u32,
    pub judge_temperature: f64,
    pub summary_max_tokens: u32,
    pub summary_temperature: f64,
    /// Characters kept when summarization fails.
    pub summary_fallback_chars: usize,
    pub call_failure_backoff_ms: u64,
    pub criteria_failure_backoff_ms: u64,
    pub inter_step_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_max_tokens: 4000,
            step_temperature: 0.7,
            judge_max_tokens: 4000,
            judge_temperature: 0.1,
            summary_max_tokens: 500,
            summary_temperature: 0.3,
            summary_fallback_chars: 2000,
            call_failure_backoff_ms: 2000,
            criteria_failure_backoff_ms: 1000,
            inter_step_delay_ms: 2000,
        }
    }
}

impl ExecutionConfig {
    /// Same budgets with every delay zeroed. Used by tests.
    pub fn without_delays(mut self) -> Self {
        self.call_failure_backoff_ms = 0;
        self.criteria_failure_backoff_ms = 0;
        self.inter_step_delay_ms = 0;
        self
    }
}
