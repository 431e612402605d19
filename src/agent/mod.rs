//! Agent module: core agent logic.
//!
//! This module contains:
//! - Conversation types (Turn, Conversation)
//! - LLM client trait and implementations
//! - Search decision (heuristic + model classification)
//! - Response streaming with rate-limited flushes and cancellation
//! - The per-channel agent controller
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod context;
mod controller;
mod decision;
mod handler;
mod message;

// LLM providers in submodule
pub mod llm;

use std::sync::Arc;

use tracing::info;

use crate::adapters::ChatChannel;
use crate::config::Config;
use crate::tools::TavilySearch;
use crate::Result;

// Re-exports for convenience
pub use context::{decision_preamble, search_preamble, writing_assistant_prompt};
pub use controller::{Agent, AgentSettings, SessionState};
pub use decision::{heuristic_outcome, parse_decision, recency_hint, SearchDecider, SearchOutcome};
pub use handler::{HandlerOutcome, HandlerRegistry, ResponseHandler, RunOptions};
pub use llm::{ChatRequest, CohereClient, LlmClient, ProviderRegistry, StreamEvent};
pub use message::{Conversation, Role, Turn};

/// Connect `user_id` to `channel` and build an agent for it.
///
/// The returned agent is not yet listening; call [`Agent::init`].
pub async fn create_agent(
    config: &Config,
    channel: Arc<dyn ChatChannel>,
    user_id: &str,
) -> Result<Agent> {
    channel.connect(user_id).await?;
    channel.watch().await?;

    let llm = ProviderRegistry::create(config)?;
    let search = Arc::new(TavilySearch::new(config.search.clone()));
    if !search.is_configured() {
        info!("No search API key configured; web search replies will carry an error payload");
    }

    Ok(Agent::new(
        user_id,
        channel,
        llm,
        search,
        AgentSettings::from(config),
    ))
}
