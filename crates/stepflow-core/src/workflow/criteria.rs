//! Completion criteria evaluation.
//!
//! Every check yields a [`CriteriaOutcome`] whose `details` is a non-empty,
//! human-readable explanation for both passes and failures. Malformed
//! criterion configuration (empty value, invalid regex) is reported as an
//! ordinary failed outcome, never as an error.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use stepflow_types::config::GlobalConfig;
use stepflow_types::llm::CompletionRequest;
use stepflow_types::workflow::Criterion;

use crate::llm::provider::LlmProvider;

/// Fenced markdown block: ```` ```lang\ncode``` ```` or ```` ```\ncode``` ````.
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:\w+)?\n(.*?)```").expect("fenced block pattern"));

/// Contiguous lines indented by four spaces or a tab.
static INDENTED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\n)((?:    |\t).+(?:\n(?:    |\t).+)*)").expect("indented block pattern")
});

/// Max characters of a regex match echoed back in the details.
const MATCH_PREVIEW_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// CriteriaOutcome
// ---------------------------------------------------------------------------

/// Result of evaluating one output against one criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriteriaOutcome {
    pub passed: bool,
    pub details: String,
}

impl CriteriaOutcome {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            passed: true,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            passed: false,
            details: details.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic checks
// ---------------------------------------------------------------------------

/// Contents of every fenced code block, in order of appearance.
pub fn extract_code_blocks(text: &str) -> Vec<&str> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

pub fn check_contains(output: &str, needle: &str) -> CriteriaOutcome {
    if needle.is_empty() {
        return CriteriaOutcome::fail("No string specified to search for");
    }
    if output.to_lowercase().contains(&needle.to_lowercase()) {
        CriteriaOutcome::pass(format!("Output contains '{needle}'"))
    } else {
        CriteriaOutcome::fail(format!("Output does not contain '{needle}'"))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
}

pub fn check_regex(output: &str, pattern: &str) -> CriteriaOutcome {
    if pattern.is_empty() {
        return CriteriaOutcome::fail("No regex pattern specified");
    }
    let re = match compile_pattern(pattern) {
        Ok(re) => re,
        Err(e) => return CriteriaOutcome::fail(format!("Invalid regex pattern: {e}")),
    };
    match re.find(output) {
        Some(m) => {
            let preview: String = m.as_str().chars().take(MATCH_PREVIEW_CHARS).collect();
            CriteriaOutcome::pass(format!("Output matches pattern. Found: '{preview}'"))
        }
        None => CriteriaOutcome::fail(format!("Output does not match pattern '{pattern}'")),
    }
}

fn parses_as_json(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// Passes on the whole output, then on any fenced block, then on the first
/// balanced `{...}` span, then on the first balanced `[...]` span.
pub fn check_json_valid(output: &str) -> CriteriaOutcome {
    if parses_as_json(output.trim()) {
        return CriteriaOutcome::pass("Output is valid JSON");
    }
    if extract_code_blocks(output)
        .into_iter()
        .any(|block| parses_as_json(block.trim()))
    {
        return CriteriaOutcome::pass("Found valid JSON in code block");
    }
    match find_embedded_json(output) {
        Some(span) => {
            CriteriaOutcome::pass(format!("Found valid JSON ({} chars)", span.chars().count()))
        }
        None => CriteriaOutcome::fail("Output does not contain valid JSON"),
    }
}

/// Scan from the first opening bracket for its balanced closing bracket,
/// skipping brackets inside string literals. Only the first candidate span
/// per bracket kind is tried.
fn find_embedded_json(output: &str) -> Option<&str> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        let Some(start) = output.find(open) else {
            continue;
        };

        let mut depth: usize = 0;
        let mut in_string = false;
        let mut escape_next = false;

        for (offset, ch) in output[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = !in_string,
                _ if in_string => {}
                c if c == open => depth += 1,
                c if c == close => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let span = &output[start..start + offset + c.len_utf8()];
                        if parses_as_json(span) {
                            return Some(span);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Fenced blocks count first; indented blocks only when no fence exists.
/// A language tag additionally requires a fence that names it.
pub fn check_code_block(output: &str, language: Option<&str>) -> CriteriaOutcome {
    let mut count = extract_code_blocks(output).len();
    if count == 0 {
        count = INDENTED_BLOCK.find_iter(output).count();
    }
    if count == 0 {
        return CriteriaOutcome::fail("No code blocks found in output");
    }

    let Some(lang) = language.filter(|l| !l.is_empty()) else {
        return CriteriaOutcome::pass(format!("Found {count} code block(s) in output"));
    };

    let fence = format!("```{}\n", regex::escape(lang));
    let names_language = RegexBuilder::new(&fence)
        .case_insensitive(true)
        .build()
        .is_ok_and(|re| re.is_match(output));

    if names_language {
        CriteriaOutcome::pass(format!("Found {count} code block(s) with language '{lang}'"))
    } else {
        CriteriaOutcome::fail(format!(
            "Found {count} code block(s) but none with language '{lang}'"
        ))
    }
}

// ---------------------------------------------------------------------------
// LLM judge
// ---------------------------------------------------------------------------

pub fn judge_prompt(original_prompt: &str, output: &str, criteria: &str) -> String {
    format!(
        "You are evaluating whether an LLM's output meets specific criteria.\n\
         \n\
         ORIGINAL PROMPT:\n\
         {original_prompt}\n\
         \n\
         LLM OUTPUT:\n\
         {output}\n\
         \n\
         CRITERIA TO EVALUATE:\n\
         {criteria}\n\
         \n\
         Evaluate whether the output meets the criteria. Respond in this exact format:\n\
         PASSED: [YES or NO]\n\
         EXPLANATION: [Brief explanation of your judgment]\n"
    )
}

/// Interpret a judge response. Pass iff it carries `PASSED: YES` in any
/// case; the details are whatever follows the first `EXPLANATION:`.
pub fn parse_judgment(response: &str) -> CriteriaOutcome {
    let upper = response.to_uppercase();
    let passed = upper.contains("PASSED: YES") || upper.contains("PASSED:YES");

    let explanation = response
        .split_once("EXPLANATION:")
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
        .unwrap_or(response.trim());

    let details = if explanation.is_empty() {
        "Judge returned an empty response".to_string()
    } else {
        explanation.to_string()
    };

    CriteriaOutcome { passed, details }
}

// ---------------------------------------------------------------------------
// CriteriaEvaluator
// ---------------------------------------------------------------------------

/// Evaluates step outputs. Holds the provider for `llm_judge` criteria.
pub struct CriteriaEvaluator<P: LlmProvider> {
    provider: Arc<P>,
    config: Arc<GlobalConfig>,
}

impl<P: LlmProvider> CriteriaEvaluator<P> {
    pub fn new(provider: Arc<P>, config: Arc<GlobalConfig>) -> Self {
        Self { provider, config }
    }

    /// Score `output` against `criterion`. `original_prompt` is the step's
    /// prompt template, used as context by the judge.
    pub async fn evaluate(
        &self,
        output: &str,
        criterion: &Criterion,
        original_prompt: &str,
    ) -> CriteriaOutcome {
        match criterion {
            Criterion::AlwaysPass => {
                CriteriaOutcome::pass("Always pass criteria - step automatically succeeds")
            }
            Criterion::Contains(needle) => check_contains(output, needle),
            Criterion::Regex(pattern) => check_regex(output, pattern),
            Criterion::JsonValid => check_json_valid(output),
            Criterion::CodeBlock(language) => check_code_block(output, language.as_deref()),
            Criterion::LlmJudge(criteria) => self.judge(output, criteria, original_prompt).await,
        }
    }

    #[tracing::instrument(skip_all, fields(model = %self.config.models.judge_model))]
    async fn judge(&self, output: &str, criteria: &str, original_prompt: &str) -> CriteriaOutcome {
        if criteria.is_empty() {
            return CriteriaOutcome::fail("No criteria specified for LLM judgment");
        }

        let request = CompletionRequest::user_prompt(
            &self.config.models.judge_model,
            &judge_prompt(original_prompt, output, criteria),
            self.config.execution.judge_max_tokens,
            self.config.execution.judge_temperature,
        );

        match self.provider.complete(&request).await {
            Ok(response) => {
                let outcome = parse_judgment(&response.content);
                tracing::debug!(passed = outcome.passed, "judge verdict");
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "judge call failed");
                CriteriaOutcome::fail(format!("Could not evaluate: {e}"))
            }
        }
    }
}

/// Why a criterion can never pass, if it is malformed.
pub fn lint_criterion(criterion: &Criterion) -> Option<String> {
    match criterion {
        Criterion::Contains(v) if v.is_empty() => {
            Some("contains criterion has no string to search for".to_string())
        }
        Criterion::Regex(v) if v.is_empty() => Some("regex criterion has no pattern".to_string()),
        Criterion::Regex(v) => compile_pattern(v)
            .err()
            .map(|e| format!("regex criterion does not compile: {e}")),
        Criterion::LlmJudge(v) if v.trim().is_empty() => {
            Some("llm_judge criterion has no criteria text".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedProvider, reply};
    use stepflow_types::llm::LlmError;

    fn evaluator(provider: ScriptedProvider) -> (CriteriaEvaluator<ScriptedProvider>, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let eval = CriteriaEvaluator::new(Arc::clone(&provider), Arc::new(GlobalConfig::default()));
        (eval, provider)
    }

    // -------------------------------------------------------------------
    // Code block extraction
    // -------------------------------------------------------------------

    #[test]
    fn extracts_fenced_blocks_with_and_without_language() {
        let text = "intro\n```python\nprint(1)\n```\nmid\n```\nraw\n```";
        assert_eq!(extract_code_blocks(text), vec!["print(1)\n", "raw\n"]);
        assert!(extract_code_blocks("no fences here").is_empty());
    }

    // -------------------------------------------------------------------
    // contains / regex
    // -------------------------------------------------------------------

    #[test]
    fn contains_is_case_insensitive() {
        let outcome = check_contains("The ANSWER is 42", "answer");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Output contains 'answer'");

        let outcome = check_contains("nothing", "answer");
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "Output does not contain 'answer'");
    }

    #[test]
    fn contains_with_empty_value_always_fails() {
        for output in ["", "anything", "  "] {
            let outcome = check_contains(output, "");
            assert!(!outcome.passed);
            assert_eq!(outcome.details, "No string specified to search for");
        }
    }

    #[test]
    fn regex_is_case_insensitive_and_multiline() {
        let outcome = check_regex("first line\nSTATUS: ok\n", r"^status: \w+$");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Output matches pattern. Found: 'STATUS: ok'");
    }

    #[test]
    fn regex_match_preview_is_capped() {
        let output = "x".repeat(250);
        let outcome = check_regex(&output, "x+");
        assert!(outcome.passed);
        assert_eq!(outcome.details, format!("Output matches pattern. Found: '{}'", "x".repeat(100)));
    }

    #[test]
    fn regex_failures() {
        let outcome = check_regex("abc", r"\d+");
        assert!(!outcome.passed);
        assert_eq!(outcome.details, r"Output does not match pattern '\d+'");

        let outcome = check_regex("abc", "(unclosed");
        assert!(!outcome.passed);
        assert!(outcome.details.starts_with("Invalid regex pattern: "));

        let outcome = check_regex("abc", "");
        assert_eq!(outcome.details, "No regex pattern specified");
    }

    // -------------------------------------------------------------------
    // json_valid
    // -------------------------------------------------------------------

    #[test]
    fn json_valid_plain_document() {
        let outcome = check_json_valid("  {\"a\":1}  ");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Output is valid JSON");
        assert!(!check_json_valid("not json").passed);
        assert_eq!(check_json_valid("not json").details, "Output does not contain valid JSON");
    }

    #[test]
    fn json_valid_in_code_block() {
        let output = "Here you go:\n```json\n{\"items\": [1, 2]}\n```\nDone.";
        let outcome = check_json_valid(output);
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found valid JSON in code block");
    }

    #[test]
    fn json_valid_embedded_span() {
        let outcome = check_json_valid("prefix {\"a\":[1,2]} suffix");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found valid JSON (11 chars)");
    }

    #[test]
    fn json_scan_ignores_braces_inside_strings() {
        assert!(check_json_valid("{\"a\": \"}\"}").passed);

        let outcome = check_json_valid("note: {\"a\": \"}\"} end");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found valid JSON (10 chars)");
    }

    #[test]
    fn json_scan_falls_back_to_arrays() {
        let outcome = check_json_valid("broken {oops} but list [1, 2, 3] here");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found valid JSON (9 chars)");
    }

    #[test]
    fn json_scan_only_tries_first_candidate_per_kind() {
        // The first `{` span is invalid, so the later valid object is not found.
        assert!(!check_json_valid("{bad} then {\"ok\": true}").passed);
    }

    // -------------------------------------------------------------------
    // code_block
    // -------------------------------------------------------------------

    #[test]
    fn code_block_counts_fenced_blocks() {
        let output = "```rust\nfn main() {}\n```\nand\n```\nls\n```";
        let outcome = check_code_block(output, None);
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found 2 code block(s) in output");
    }

    #[test]
    fn code_block_accepts_indented_when_unfenced() {
        let output = "Example:\n    let x = 1;\n    let y = 2;\nEnd";
        let outcome = check_code_block(output, None);
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found 1 code block(s) in output");

        let outcome = check_code_block("plain prose only", None);
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "No code blocks found in output");
    }

    #[test]
    fn code_block_language_mismatch_reports_count() {
        let output = "```js\nconsole.log(1)\n```";
        let outcome = check_code_block(output, Some("python"));
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "Found 1 code block(s) but none with language 'python'");
    }

    #[test]
    fn code_block_language_match_is_case_insensitive() {
        let output = "```Python\nprint('hi')\n```";
        let outcome = check_code_block(output, Some("python"));
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Found 1 code block(s) with language 'python'");
    }

    #[test]
    fn code_block_language_is_matched_literally() {
        let output = "```c++\nint main() {}\n```";
        // `\w+` does not cover `c++`, so this is not a counted fence.
        let outcome = check_code_block(output, Some("c++"));
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "No code blocks found in output");
    }

    // -------------------------------------------------------------------
    // Judge
    // -------------------------------------------------------------------

    #[test]
    fn parse_judgment_variants() {
        let outcome = parse_judgment("PASSED: YES\nEXPLANATION: Looks right.");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Looks right.");

        let outcome = parse_judgment("passed:yes");
        assert!(outcome.passed);
        assert_eq!(outcome.details, "passed:yes");

        let outcome = parse_judgment("PASSED: NO\nEXPLANATION: Missing the title.");
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "Missing the title.");

        assert!(!parse_judgment("").details.is_empty());
    }

    #[test]
    fn judge_prompt_embeds_all_parts() {
        let prompt = judge_prompt("Write a poem", "Roses are red", "Must rhyme");
        assert!(prompt.starts_with("You are evaluating whether an LLM's output meets specific criteria.\n\n"));
        assert!(prompt.contains("ORIGINAL PROMPT:\nWrite a poem\n\n"));
        assert!(prompt.contains("LLM OUTPUT:\nRoses are red\n\n"));
        assert!(prompt.contains("CRITERIA TO EVALUATE:\nMust rhyme\n\n"));
        assert!(prompt.ends_with("EXPLANATION: [Brief explanation of your judgment]\n"));
    }

    #[tokio::test]
    async fn llm_judge_uses_judge_model_and_temperature() {
        let (eval, provider) = evaluator(ScriptedProvider::new(
            vec![Ok(reply("PASSED: YES\nEXPLANATION: Rhymes well.", 5, 5))],
            Ok(reply("unused", 0, 0)),
        ));

        let outcome = eval
            .evaluate("Roses are red", &Criterion::LlmJudge("Must rhyme".into()), "Write a poem")
            .await;
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Rhymes well.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "kimi-k2p5");
        assert_eq!(requests[0].temperature, Some(0.1));
        assert!(requests[0].messages[0].content.contains("Must rhyme"));
    }

    #[tokio::test]
    async fn llm_judge_provider_error_is_a_failed_outcome() {
        let (eval, _) = evaluator(ScriptedProvider::always_failing(LlmError::Connection(
            "refused".into(),
        )));
        let outcome = eval
            .evaluate("text", &Criterion::LlmJudge("Be nice".into()), "prompt")
            .await;
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "Could not evaluate: Connection error: refused");
    }

    #[tokio::test]
    async fn llm_judge_without_criteria_skips_the_call() {
        let (eval, provider) = evaluator(ScriptedProvider::always("PASSED: YES"));
        let outcome = eval.evaluate("text", &Criterion::LlmJudge(String::new()), "p").await;
        assert!(!outcome.passed);
        assert_eq!(outcome.details, "No criteria specified for LLM judgment");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn evaluate_dispatches_deterministic_kinds() {
        let (eval, provider) = evaluator(ScriptedProvider::always("unused"));
        let outcome = eval.evaluate("whatever", &Criterion::AlwaysPass, "").await;
        assert!(outcome.passed);
        assert_eq!(outcome.details, "Always pass criteria - step automatically succeeds");

        assert!(eval.evaluate("[1]", &Criterion::JsonValid, "").await.passed);
        assert!(!eval.evaluate("x", &Criterion::CodeBlock(Some("go".into())), "").await.passed);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn lint_flags_criteria_that_cannot_pass() {
        assert!(lint_criterion(&Criterion::Contains(String::new())).is_some());
        assert!(lint_criterion(&Criterion::Regex("(".into())).is_some());
        assert!(lint_criterion(&Criterion::LlmJudge("  ".into())).is_some());
        assert!(lint_criterion(&Criterion::Regex(r"\d+".into())).is_none());
        assert!(lint_criterion(&Criterion::CodeBlock(None)).is_none());
    }
}
