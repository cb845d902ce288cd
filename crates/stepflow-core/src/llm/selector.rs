//! Model auto-selection for steps configured with the `auto` model.

use stepflow_types::config::ModelConfig;
use stepflow_types::workflow::CriterionKind;

/// Pick between the simple and complex model tiers.
///
/// A task counts as complex when the prompt is longer than
/// `complexity_prompt_chars` characters, the criterion needs structured or
/// judged output, or the prompt mentions one of the complexity keywords.
pub fn select_model<'a>(models: &'a ModelConfig, prompt: &str, criterion: CriterionKind) -> &'a str {
    let long_prompt = prompt.chars().count() > models.complexity_prompt_chars;
    let demanding_criterion = matches!(
        criterion,
        CriterionKind::LlmJudge | CriterionKind::JsonValid | CriterionKind::CodeBlock
    );
    let lowered = prompt.to_lowercase();
    let has_keyword = models
        .complexity_keywords
        .iter()
        .any(|k| lowered.contains(&k.to_lowercase()));

    if long_prompt || demanding_criterion || has_keyword {
        &models.complex_model
    } else {
        &models.simple_model
    }
}
