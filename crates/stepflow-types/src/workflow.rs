//! Workflow definition types.
//!
//! A workflow is an ordered list of LLM steps. Each step carries its model,
//! prompt, completion criterion, retry budget, and the rule for turning its
//! output into the next step's context.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model id sentinel that defers model choice to the selector at run time.
pub const AUTO_MODEL: &str = "auto";

/// Default retry budget for a step (so four attempts in total).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Create an empty definition with a fresh id.
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Steps sorted by `order`. Ties keep their declaration order.
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    pub fn step(&self, step_id: &Uuid) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == *step_id)
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// One LLM invocation unit within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: Uuid,
    /// Sort key; need not be contiguous.
    pub order: i32,
    pub name: String,
    /// Model id, or [`AUTO_MODEL`].
    pub model: String,
    pub prompt: String,
    pub criterion: Criterion,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub context_mode: ContextMode,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl StepDefinition {
    /// Total attempts allowed: the first try plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn uses_auto_model(&self) -> bool {
        self.model == AUTO_MODEL
    }
}

// ---------------------------------------------------------------------------
// Criterion
// ---------------------------------------------------------------------------

/// The rule a step's output must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Criterion {
    AlwaysPass,
    /// Case-insensitive substring.
    Contains(String),
    /// Case-insensitive, multi-line pattern search.
    Regex(String),
    JsonValid,
    /// Optional language tag the fence must name.
    CodeBlock(Option<String>),
    /// Natural-language criteria handed to a judging model.
    LlmJudge(String),
}

impl Criterion {
    pub fn kind(&self) -> CriterionKind {
        match self {
            Criterion::AlwaysPass => CriterionKind::AlwaysPass,
            Criterion::Contains(_) => CriterionKind::Contains,
            Criterion::Regex(_) => CriterionKind::Regex,
            Criterion::JsonValid => CriterionKind::JsonValid,
            Criterion::CodeBlock(_) => CriterionKind::CodeBlock,
            Criterion::LlmJudge(_) => CriterionKind::LlmJudge,
        }
    }

    /// The configured value, if this kind carries one.
    pub fn value(&self) -> Option<&str> {
        match self {
            Criterion::Contains(v) | Criterion::Regex(v) | Criterion::LlmJudge(v) => Some(v),
            Criterion::CodeBlock(lang) => lang.as_deref(),
            Criterion::AlwaysPass | Criterion::JsonValid => None,
        }
    }

    /// Build a criterion from its flat `(kind, value)` representation.
    ///
    /// Missing values become empty strings for kinds that need one; an empty
    /// language tag on `code_block` means "any language".
    pub fn from_parts(kind: CriterionKind, value: Option<String>) -> Self {
        match kind {
            CriterionKind::AlwaysPass => Criterion::AlwaysPass,
            CriterionKind::Contains => Criterion::Contains(value.unwrap_or_default()),
            CriterionKind::Regex => Criterion::Regex(value.unwrap_or_default()),
            CriterionKind::JsonValid => Criterion::JsonValid,
            CriterionKind::CodeBlock => Criterion::CodeBlock(value.filter(|v| !v.is_empty())),
            CriterionKind::LlmJudge => Criterion::LlmJudge(value.unwrap_or_default()),
        }
    }
}

impl Default for Criterion {
    fn default() -> Self {
        Criterion::AlwaysPass
    }
}

/// Payload-free discriminant of [`Criterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    AlwaysPass,
    Contains,
    Regex,
    JsonValid,
    CodeBlock,
    LlmJudge,
}

impl CriterionKind {
    pub const ALL: [CriterionKind; 6] = [
        CriterionKind::AlwaysPass,
        CriterionKind::Contains,
        CriterionKind::Regex,
        CriterionKind::JsonValid,
        CriterionKind::CodeBlock,
        CriterionKind::LlmJudge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionKind::AlwaysPass => "always_pass",
            CriterionKind::Contains => "contains",
            CriterionKind::Regex => "regex",
            CriterionKind::JsonValid => "json_valid",
            CriterionKind::CodeBlock => "code_block",
            CriterionKind::LlmJudge => "llm_judge",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CriterionKind::AlwaysPass => "Always Pass",
            CriterionKind::Contains => "Contains String",
            CriterionKind::Regex => "Regex Match",
            CriterionKind::JsonValid => "Valid JSON",
            CriterionKind::CodeBlock => "Has Code Block",
            CriterionKind::LlmJudge => "LLM Judge",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CriterionKind::AlwaysPass => "Step always succeeds (for testing)",
            CriterionKind::Contains => "Output must contain specific text",
            CriterionKind::Regex => "Output must match a regex pattern",
            CriterionKind::JsonValid => "Output must be valid JSON",
            CriterionKind::CodeBlock => "Output must contain code blocks",
            CriterionKind::LlmJudge => "Use another LLM to evaluate",
        }
    }
}

impl fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CriterionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CriterionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown criteria type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ContextMode
// ---------------------------------------------------------------------------

/// How a completed step's output becomes the next step's input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Full,
    CodeOnly,
    Summary,
    /// Template with `{{output}}` and `{{code}}` placeholders.
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
}

impl ContextMode {
    pub fn kind(&self) -> ContextModeKind {
        match self {
            ContextMode::Full => ContextModeKind::Full,
            ContextMode::CodeOnly => ContextModeKind::CodeOnly,
            ContextMode::Summary => ContextModeKind::Summary,
            ContextMode::Custom { .. } => ContextModeKind::Custom,
        }
    }

    pub fn template(&self) -> Option<&str> {
        match self {
            ContextMode::Custom { template } => template.as_deref(),
            _ => None,
        }
    }

    /// Build a mode from its flat `(mode, template)` representation. The
    /// template is only kept for `custom`, and an empty one counts as absent.
    pub fn from_parts(kind: ContextModeKind, template: Option<String>) -> Self {
        match kind {
            ContextModeKind::Full => ContextMode::Full,
            ContextModeKind::CodeOnly => ContextMode::CodeOnly,
            ContextModeKind::Summary => ContextMode::Summary,
            ContextModeKind::Custom => ContextMode::Custom {
                template: template.filter(|t| !t.is_empty()),
            },
        }
    }
}

/// Payload-free discriminant of [`ContextMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextModeKind {
    Full,
    CodeOnly,
    Summary,
    Custom,
}

impl ContextModeKind {
    pub const ALL: [ContextModeKind; 4] = [
        ContextModeKind::Full,
        ContextModeKind::CodeOnly,
        ContextModeKind::Summary,
        ContextModeKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextModeKind::Full => "full",
            ContextModeKind::CodeOnly => "code_only",
            ContextModeKind::Summary => "summary",
            ContextModeKind::Custom => "custom",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContextModeKind::Full => "Full Output",
            ContextModeKind::CodeOnly => "Code Only",
            ContextModeKind::Summary => "Summary",
            ContextModeKind::Custom => "Custom",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ContextModeKind::Full => "Pass entire previous output",
            ContextModeKind::CodeOnly => "Extract and pass only code blocks",
            ContextModeKind::Summary => "LLM summarizes before passing",
            ContextModeKind::Custom => "User-defined extraction template",
        }
    }
}

impl fmt::Display for ContextModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContextModeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown context mode: {s}"))
    }
}
