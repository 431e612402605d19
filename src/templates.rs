//! Prompt templates.
//!
//! Templates are embedded at compile time from the `templates/` directory.
//! Placeholders use `{{name}}` and are filled by [`render`].

/// Writing-assistant persona. Placeholders: `date`, `context`.
pub const WRITING_ASSISTANT: &str = include_str!("../templates/WRITING_ASSISTANT.md");

/// Search-need classifier instructions. Placeholder: `hint`.
pub const SEARCH_DECISION: &str = include_str!("../templates/SEARCH_DECISION.md");

/// Search evidence block appended to the preamble. Placeholder: `results`.
pub const SEARCH_RESULTS: &str = include_str!("../templates/SEARCH_RESULTS.md");

/// Substitute `{{key}}` placeholders in a template.
///
/// Unknown placeholders are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.trim_end().to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
