//! Search decision - does a message need live web results?
//!
//! A cheap lexical heuristic runs first and is passed to the model as a hint.
//! The model's JSON verdict wins whenever it can be parsed; otherwise the
//! heuristic alone decides.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::context::decision_preamble;
use super::llm::{ChatRequest, LlmClient};

/// Terms implying the answer depends on current information.
static RECENCY_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(today|yesterday|latest|news|current|recent|update|price|who won|score|weather|release|launch)\b",
    )
    .expect("recency pattern is valid")
});

/// Result of the search decision for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchOutcome {
    pub needs_search: bool,
    pub query: Option<String>,
}

impl SearchOutcome {
    /// The query to run, if a search should happen.
    pub fn search_query(&self) -> Option<&str> {
        if self.needs_search {
            self.query.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDecision {
    #[serde(default)]
    needs_search: bool,
    #[serde(default)]
    query: Option<String>,
}

/// Whether the message mentions anything time-sensitive.
pub fn recency_hint(message: &str) -> bool {
    RECENCY_TERMS.is_match(message)
}

/// Extract the JSON object between the first `{` and the last `}`.
///
/// Returns `None` when there is no such span or it does not parse.
pub fn parse_decision(raw: &str) -> Option<SearchOutcome> {
    let text = raw.trim();
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: RawDecision = serde_json::from_str(&text[start..=end]).ok()?;
    let query = parsed
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());

    Some(SearchOutcome {
        needs_search: parsed.needs_search,
        query,
    })
}

/// Decision from the heuristic alone: search the raw message when it fires.
pub fn heuristic_outcome(message: &str) -> SearchOutcome {
    if recency_hint(message) {
        SearchOutcome {
            needs_search: true,
            query: Some(message.to_string()),
        }
    } else {
        SearchOutcome::default()
    }
}

/// Decides whether a message needs web search.
pub struct SearchDecider {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl SearchDecider {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    /// Best-effort decision. Never fails.
    pub async fn decide(&self, user_message: &str, context_prompt: &str) -> SearchOutcome {
        let hint = recency_hint(user_message);

        let request = ChatRequest::new(self.model.as_str(), user_message)
            .with_preamble(decision_preamble(context_prompt, hint))
            .with_temperature(self.temperature);

        let raw = match self.llm.chat(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Search decision call failed, using heuristic: {}", e);
                return heuristic_outcome(user_message);
            }
        };

        match parse_decision(&raw) {
            Some(mut outcome) => {
                if outcome.needs_search && outcome.query.is_none() {
                    outcome.query = Some(user_message.to_string());
                }
                debug!("Search decision: {:?} (hint: {})", outcome, hint);
                outcome
            }
            None => {
                warn!("Unparseable search decision {:?}, using heuristic", raw);
                heuristic_outcome(user_message)
            }
        }
    }
}
