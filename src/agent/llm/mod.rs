//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`ProviderRegistry`] for dynamic provider creation
//! - Concrete implementation: Cohere chat API
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `openai.rs`)
//! 2. Implement `LlmClient` trait, including the streaming call
//! 3. Add to `ProviderRegistry::create()`
//! 4. Add config fields in `config.rs`

mod types;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::Config;
use crate::error::Error;
use crate::Result;

pub use types::*;

pub mod cohere;

pub use cohere::CohereClient;

use super::message::Turn;

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,

    /// The current user prompt.
    pub message: String,

    /// System-level instructions.
    pub preamble: Option<String>,

    /// Prior turns, oldest first. Does not include `message`.
    pub chat_history: Vec<Turn>,

    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: message.into(),
            preamble: None,
            chat_history: Vec::new(),
            temperature: 0.7,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.chat_history = history;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// One event from a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StreamStart,
    TextGeneration { text: String },
    StreamEnd { finish_reason: Option<String> },
    /// Any event type this crate does not act on.
    Other { event_type: String },
}

/// Stream of completion events.
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// LLM client trait: swappable provider abstraction.
///
/// Implement this trait to add a new LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a request and wait for the full reply text.
    async fn chat(&self, request: &ChatRequest) -> Result<String>;

    /// Open a streaming completion.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream>;

    /// Fail with [`Error::Config`] if the client has no usable credential.
    fn ensure_credentials(&self) -> Result<()>;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;
}

/// Provider registry: creates LLM clients dynamically.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config)?;
/// let text = client.chat(&ChatRequest::new("command-r-plus", "Hi")).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client from configuration.
    ///
    /// Supported providers:
    /// - `"cohere"`: Cohere chat API with API key authentication
    pub fn create(config: &Config) -> Result<Arc<dyn LlmClient>> {
        match config.provider.as_str() {
            "cohere" => {
                let client = CohereClient::new(&config.cohere_api_key, &config.model);
                Ok(Arc::new(client))
            }
            other => Err(Error::Config(format!("Unknown provider: {other}"))),
        }
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["cohere"]
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new().with_reply("Hello!").with_reply("World!");
        let request = ChatRequest::new("fake-model", "Hi");

        assert_eq!(client.chat(&request).await.unwrap(), "Hello!");
        assert_eq!(client.chat(&request).await.unwrap(), "World!");
        assert!(client.chat(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_fake_stream() {
        let client = FakeLlmClient::new().with_stream(vec![Step::Text("a"), Step::Text("b")]);
        let stream = client
            .chat_stream(&ChatRequest::new("fake-model", "Hi"))
            .await
            .unwrap();

        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], StreamEvent::TextGeneration { text: "a".to_string() });
    }

    #[test]
    fn test_registry_rejects_unknown_provider() {
        let config = Config {
            provider: "nope".to_string(),
            ..Config::default()
        };
        assert!(matches!(ProviderRegistry::create(&config), Err(Error::Config(_))));
        assert!(ProviderRegistry::create(&Config::default()).is_ok());
    }
}
