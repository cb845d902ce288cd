//! Workflow definition documents, validation, and filesystem operations.
//!
//! Converts between portable JSON/YAML documents and the canonical
//! `WorkflowDefinition`, validates structural constraints, and lints
//! criterion configurations that can never pass.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stepflow_types::workflow::{
    ContextMode, ContextModeKind, Criterion, CriterionKind, DEFAULT_MAX_RETRIES, StepDefinition,
    WorkflowDefinition,
};
use thiserror::Error;
use uuid::Uuid;

use super::criteria::lint_criterion;

/// Document format version written by [`export_workflow`].
pub const DOCUMENT_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow document operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("Invalid import format: missing 'workflow' key")]
    MissingWorkflow,

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

/// Portable, id-free representation of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBody {
    #[serde(default = "default_workflow_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

/// One step in flat `criteria_type`/`criteria_value` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    #[serde(default = "default_order")]
    pub order: i32,
    #[serde(default = "default_step_name")]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_criteria_type")]
    pub criteria_type: String,
    #[serde(default)]
    pub criteria_value: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_context_mode")]
    pub context_mode: String,
    #[serde(default)]
    pub context_template: Option<String>,
}

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

fn default_workflow_name() -> String {
    "Imported Workflow".to_string()
}

fn default_order() -> i32 {
    1
}

fn default_step_name() -> String {
    "Step".to_string()
}

fn default_criteria_type() -> String {
    CriterionKind::AlwaysPass.as_str().to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_context_mode() -> String {
    ContextModeKind::Full.as_str().to_string()
}

/// Serialization format of a document, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yaml`/`.yml` files are YAML; everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

/// Build the portable document for `def`, steps sorted by order.
pub fn export_workflow(def: &WorkflowDefinition) -> WorkflowDocument {
    let steps = def
        .ordered_steps()
        .into_iter()
        .map(|step| StepDocument {
            order: step.order,
            name: step.name.clone(),
            model: Some(step.model.clone()),
            prompt: step.prompt.clone(),
            criteria_type: step.criterion.kind().as_str().to_string(),
            criteria_value: step.criterion.value().map(str::to_string),
            max_retries: step.max_retries,
            context_mode: step.context_mode.kind().as_str().to_string(),
            context_template: step.context_mode.template().map(str::to_string),
        })
        .collect();

    WorkflowDocument {
        version: DOCUMENT_VERSION.to_string(),
        workflow: Some(WorkflowBody {
            name: def.name.clone(),
            description: def.description.clone(),
            steps,
        }),
    }
}

/// Build a new definition (fresh ids) from a document.
///
/// Steps without a model get `default_model`. Unknown criteria or context
/// kinds are rejected.
pub fn import_workflow(
    doc: &WorkflowDocument,
    default_model: &str,
) -> Result<WorkflowDefinition, WorkflowError> {
    let body = doc.workflow.as_ref().ok_or(WorkflowError::MissingWorkflow)?;

    let mut def = WorkflowDefinition::new(body.name.clone(), body.description.clone());
    for step in &body.steps {
        let criteria_kind: CriterionKind = step
            .criteria_type
            .parse()
            .map_err(|e: String| WorkflowError::ValidationError(format!("step '{}': {e}", step.name)))?;
        let context_kind: ContextModeKind = step
            .context_mode
            .parse()
            .map_err(|e: String| WorkflowError::ValidationError(format!("step '{}': {e}", step.name)))?;

        def.steps.push(StepDefinition {
            id: Uuid::now_v7(),
            order: step.order,
            name: step.name.clone(),
            model: step
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_model.to_string()),
            prompt: step.prompt.clone(),
            criterion: Criterion::from_parts(criteria_kind, step.criteria_value.clone()),
            max_retries: step.max_retries,
            context_mode: ContextMode::from_parts(context_kind, step.context_template.clone()),
        });
    }

    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_document(text: &str, format: DocumentFormat) -> Result<WorkflowDocument, WorkflowError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml_ng::from_str(text).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
    }
}

pub fn serialize_document(doc: &WorkflowDocument, format: DocumentFormat) -> Result<String, WorkflowError> {
    match format {
        DocumentFormat::Json => {
            serde_json::to_string_pretty(doc).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
        DocumentFormat::Yaml => {
            serde_yaml_ng::to_string(doc).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - Every step has a non-empty name
/// - All step IDs are unique
///
/// An empty step list is valid; running such a workflow fails at run time.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step at order {} has an empty name",
                step.order
            )));
        }
        if !seen_ids.insert(step.id) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    Ok(())
}

/// Human-readable warnings for a definition that is valid but likely wrong:
/// criteria that can never pass, duplicate orders, and no steps at all.
pub fn lint_definition(def: &WorkflowDefinition) -> Vec<String> {
    let mut warnings = Vec::new();

    if def.steps.is_empty() {
        warnings.push("workflow has no steps; running it will fail".to_string());
    }

    let mut seen_orders = HashSet::new();
    for step in def.ordered_steps() {
        if !seen_orders.insert(step.order) {
            warnings.push(format!(
                "step '{}' shares order {} with another step; they run in insertion order",
                step.name, step.order
            ));
        }
        if let Some(problem) = lint_criterion(&step.criterion) {
            warnings.push(format!(
                "step '{}': {problem}; it will fail after {} attempts",
                step.name,
                step.max_attempts()
            ));
        }
    }

    warnings
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a document from a JSON or YAML file.
pub fn load_document_file(path: &Path) -> Result<WorkflowDocument, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_document(&content, DocumentFormat::from_path(path))
}

/// Save a document, creating parent directories if they don't exist.
pub fn save_document_file(
    path: &Path,
    doc: &WorkflowDocument,
    format: DocumentFormat,
) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serialize_document(doc, format)?;
    std::fs::write(path, text)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
