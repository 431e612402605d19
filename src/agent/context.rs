//! Prompt composition.
//!
//! Builds the three preambles the agent sends to the model: the
//! writing-assistant system prompt, the search-decision instructions, and the
//! search-augmented preamble used when web results are available.

use chrono::{Local, NaiveDate};

use crate::templates::{self, render};

/// Fallback writing context when the message carries no task.
const GENERAL_CONTEXT: &str = "General writing assistance.";

/// Writing-assistant system prompt dated today.
pub fn writing_assistant_prompt(task: Option<&str>) -> String {
    writing_assistant_prompt_on(Local::now().date_naive(), task)
}

/// Writing-assistant system prompt for a given date.
pub fn writing_assistant_prompt_on(date: NaiveDate, task: Option<&str>) -> String {
    let context = task
        .map(|t| format!("Writing Task: {}", t))
        .unwrap_or_else(|| GENERAL_CONTEXT.to_string());
    let date = date.format("%B %-d, %Y").to_string();

    render(
        templates::WRITING_ASSISTANT,
        &[("date", date.as_str()), ("context", context.as_str())],
    )
}

/// Instructions for the search-need classifier.
///
/// `hint` is the lexical heuristic result, offered to the model as a weak prior.
pub fn decision_preamble(system_prompt: &str, hint: bool) -> String {
    let hint = if hint { "LIKELY" } else { "UNKNOWN" };
    format!(
        "{}\n\n{}",
        system_prompt,
        render(templates::SEARCH_DECISION, &[("hint", hint)])
    )
}

/// System prompt extended with serialized search results.
pub fn search_preamble(system_prompt: &str, results: &str) -> String {
    format!(
        "{}\n\n{}",
        system_prompt,
        render(templates::SEARCH_RESULTS, &[("results", results)])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writing_prompt_defaults_to_general_context() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let prompt = writing_assistant_prompt_on(date, None);

        assert!(prompt.contains("expert AI Writing Assistant"));
        assert!(prompt.contains("**Current Date**: March 7, 2024"));
        assert!(prompt.contains("**Writing Context**: General writing assistance."));
    }

    #[test]
    fn test_writing_prompt_includes_task() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let prompt = writing_assistant_prompt_on(date, Some("Cover letter"));
        assert!(prompt.contains("**Writing Context**: Writing Task: Cover letter"));
    }

    #[test]
    fn test_decision_preamble_embeds_hint() {
        let preamble = decision_preamble("SYSTEM", true);
        assert!(preamble.starts_with("SYSTEM\n\n"));
        assert!(preamble.contains(r#"{"needsSearch": boolean, "query": string}"#));
        assert!(preamble.contains("Heuristic hint: LIKELY."));
        assert!(decision_preamble("SYSTEM", false).contains("Heuristic hint: UNKNOWN."));
    }

    #[test]
    fn test_search_preamble_wraps_results() {
        let preamble = search_preamble("SYSTEM", r#"{"results":[]}"#);
        assert!(preamble.starts_with("SYSTEM"));
        assert!(preamble.contains("=== WEB_SEARCH_RESULTS (JSON) ===\n{\"results\":[]}\n=== END_RESULTS ==="));
        assert!(preamble.contains("cite them"));
        assert!(preamble.contains("low quality"));
    }
}
