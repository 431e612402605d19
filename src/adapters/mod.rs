//! Adapters module: host chat channel integrations.
//!
//! The agent never talks to a chat platform directly. It drives a
//! [`ChatChannel`], which exposes the handful of operations the agent needs:
//! create a message, rewrite its text, emit indicator events, and deliver
//! inbound events through a [`Subscription`].
//!
//! # Supported Channels
//!
//! - **Local**: in-process channel used by the CLI and tests
//! - **Telegram**: Telegram Bot API via teloxide
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `slack.rs`)
//! 2. Implement the [`ChatChannel`] trait
//! 3. Map the platform's "stop" affordance to [`ChannelEvent::IndicatorStop`]

pub mod cli;
pub mod local;
pub mod telegram;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::Result;

/// Agent progress state carried by `ai_indicator.update` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

/// Indicator event emitted by the agent, bound to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IndicatorEvent {
    #[serde(rename = "ai_indicator.update")]
    Update {
        ai_state: AiState,
        cid: String,
        message_id: String,
    },
    #[serde(rename = "ai_indicator.clear")]
    Clear { cid: String, message_id: String },
}

impl IndicatorEvent {
    pub fn update(state: AiState, message: &ChannelMessage) -> Self {
        IndicatorEvent::Update {
            ai_state: state,
            cid: message.cid.clone(),
            message_id: message.id.clone(),
        }
    }

    pub fn clear(message: &ChannelMessage) -> Self {
        IndicatorEvent::Clear {
            cid: message.cid.clone(),
            message_id: message.id.clone(),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            IndicatorEvent::Update { message_id, .. } | IndicatorEvent::Clear { message_id, .. } => {
                message_id
            }
        }
    }
}

/// A message as stored by the host channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub cid: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Set on every message the agent creates, so it never answers itself.
    #[serde(default)]
    pub ai_generated: bool,
    /// Free-form fields attached by the client (e.g. `writingTask`).
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl ChannelMessage {
    /// Optional writing task the client attached to the message.
    pub fn writing_task(&self) -> Option<&str> {
        self.custom
            .get("writingTask")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A message the agent asks the channel to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub text: String,
    pub ai_generated: bool,
}

impl OutgoingMessage {
    /// Empty agent-generated message used as the streaming target.
    pub fn placeholder() -> Self {
        Self {
            text: String::new(),
            ai_generated: true,
        }
    }
}

/// Inbound event delivered by the host channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: ChannelMessage },
    #[serde(rename = "ai_indicator.stop")]
    IndicatorStop { message_id: String },
}

/// Scoped subscription to a channel's inbound events.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<ChannelEvent>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<ChannelEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscription lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Host chat channel the agent is bound to.
///
/// All implementations must be [`Send`] + [`Sync`]; the agent shares one
/// channel between concurrent replies.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Channel name (e.g., "telegram", "local").
    fn name(&self) -> &str;

    /// Channel id, stamped on every indicator event.
    fn cid(&self) -> &str;

    /// Connect as the given user.
    async fn connect(&self, user_id: &str) -> Result<()>;

    /// Start watching the channel.
    async fn watch(&self) -> Result<()>;

    /// Subscribe to inbound events.
    fn subscribe(&self) -> Subscription;

    /// Create a new message and return it with its assigned id.
    async fn send_message(&self, message: OutgoingMessage) -> Result<ChannelMessage>;

    /// Replace the text of an existing message.
    async fn update_message_text(&self, message_id: &str, text: &str) -> Result<()>;

    /// Emit an indicator event.
    async fn send_event(&self, event: IndicatorEvent) -> Result<()>;

    /// Disconnect from the host.
    async fn disconnect(&self) -> Result<()>;
}
