//! Agent controller - one agent per channel.
//!
//! The [`Agent`] subscribes to its channel, keeps the conversation log, and
//! runs every qualifying message through the same pipeline:
//!
//! 1. placeholder message + THINKING
//! 2. search decision, optional web search (EXTERNAL_SOURCES)
//! 3. GENERATING + streamed reply via a [`ResponseHandler`]
//!
//! Messages are processed concurrently, each against its own placeholder.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{search_preamble, writing_assistant_prompt};
use super::decision::SearchDecider;
use super::handler::{HandlerOutcome, HandlerRegistry, ResponseHandler, RunOptions};
use super::llm::LlmClient;
use super::message::{Conversation, Turn};
use crate::adapters::{
    AiState, ChannelEvent, ChannelMessage, ChatChannel, IndicatorEvent, OutgoingMessage,
    Subscription,
};
use crate::config::Config;
use crate::error::Error;
use crate::tools::SearchProvider;
use crate::Result;

/// Tunables for one agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub decision_temperature: f32,
    pub flush_interval: Duration,
    pub history_limit: Option<usize>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AgentSettings {
    fn from(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            decision_temperature: config.decision_temperature,
            flush_interval: config.flush_interval(),
            history_limit: config.history_limit,
        }
    }
}

/// Lifecycle of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Disposed,
}

/// A user message accepted for a reply.
struct PendingReply {
    text: String,
    writing_task: Option<String>,
    /// Conversation as it stood before this message.
    prior_turns: Vec<Turn>,
}

struct AgentInner {
    user_id: String,
    channel: Arc<dyn ChatChannel>,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchProvider>,
    decider: SearchDecider,
    settings: AgentSettings,
    conversation: Mutex<Conversation>,
    handlers: HandlerRegistry,
    last_interaction_ms: AtomicI64,
    state: StdMutex<SessionState>,
    shutdown: CancellationToken,
}

/// AI writing assistant bound to one (user, channel) pair.
pub struct Agent {
    inner: Arc<AgentInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Create an agent. Nothing happens until [`Agent::init`].
    pub fn new(
        user_id: impl Into<String>,
        channel: Arc<dyn ChatChannel>,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchProvider>,
        settings: AgentSettings,
    ) -> Self {
        let decider = SearchDecider::new(
            llm.clone(),
            settings.model.clone(),
            settings.decision_temperature,
        );
        let conversation = Conversation::with_limit(settings.history_limit);

        Self {
            inner: Arc::new(AgentInner {
                user_id: user_id.into(),
                channel,
                llm,
                search,
                decider,
                settings,
                conversation: Mutex::new(conversation),
                handlers: HandlerRegistry::new(),
                last_interaction_ms: AtomicI64::new(Utc::now().timestamp_millis()),
                state: StdMutex::new(SessionState::Uninitialized),
                shutdown: CancellationToken::new(),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Validate credentials and start listening for messages.
    ///
    /// A missing model credential is the only error that surfaces here.
    pub async fn init(&self) -> Result<()> {
        let subscription = {
            let mut state = self.inner.state();
            match *state {
                SessionState::Uninitialized => {}
                SessionState::Ready => {
                    return Err(Error::Session("agent already initialized".to_string()))
                }
                SessionState::Disposed => {
                    return Err(Error::Session("agent has been disposed".to_string()))
                }
            }
            self.inner.llm.ensure_credentials()?;
            *state = SessionState::Ready;
            self.inner.channel.subscribe()
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.listen(subscription).await });
        *self.listener.lock().await = Some(handle);

        info!(
            "Agent for {} ready on {}",
            self.inner.user_id,
            self.inner.channel.cid()
        );
        Ok(())
    }

    /// Stop listening, disconnect, and tear down every live reply.
    ///
    /// In-flight replies end without further writes. Safe to call twice.
    pub async fn dispose(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if *state == SessionState::Disposed {
                return Ok(());
            }
            *state = SessionState::Disposed;
        }

        self.inner.shutdown.cancel();
        if let Some(handle) = self.listener.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Agent listener ended abnormally: {}", e);
            }
        }

        let disconnected = self.inner.channel.disconnect().await;

        let abandoned = self.inner.handlers.drain().len();
        self.inner.conversation.lock().await.clear();

        info!(
            "Agent for {} disposed ({} live replies abandoned)",
            self.inner.user_id, abandoned
        );
        disconnected
    }

    /// Process one inbound message to completion.
    ///
    /// Returns `None` when the message does not qualify for a reply or the
    /// agent is not ready.
    pub async fn on_message(&self, message: ChannelMessage) -> Option<HandlerOutcome> {
        let pending = self.inner.accept(message).await?;
        self.inner.respond(pending).await
    }

    /// Stop the reply streaming into `message_id`.
    pub fn stop(&self, message_id: &str) -> bool {
        self.inner.handlers.stop(message_id)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state()
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Time of the last accepted message (or of construction).
    pub fn last_interaction(&self) -> DateTime<Utc> {
        let ms = self.inner.last_interaction_ms.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// Snapshot of the conversation log.
    pub async fn conversation(&self) -> Vec<Turn> {
        self.inner.conversation.lock().await.turns()
    }

    /// Number of replies currently streaming.
    pub fn live_handlers(&self) -> usize {
        self.inner.handlers.len()
    }
}

impl AgentInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ready(&self) -> bool {
        *self.state() == SessionState::Ready
    }

    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = subscription.recv() => event,
            };

            match event {
                Some(ChannelEvent::MessageNew { message }) => {
                    // Accept inline so turns are logged in arrival order.
                    if let Some(pending) = self.accept(message).await {
                        let inner = self.clone();
                        tokio::spawn(async move {
                            inner.respond(pending).await;
                        });
                    }
                }
                Some(ChannelEvent::IndicatorStop { message_id }) => {
                    if !self.handlers.stop(&message_id) {
                        debug!("Stop for {} matched no live reply", message_id);
                    }
                }
                None => {
                    debug!("Channel {} closed its event stream", self.channel.cid());
                    break;
                }
            }
        }
        debug!("Agent listener for {} stopped", self.channel.cid());
    }

    /// Qualify a message and log it as a user turn.
    async fn accept(&self, message: ChannelMessage) -> Option<PendingReply> {
        if !self.is_ready() {
            warn!("Ignoring message {}: agent is not ready", message.id);
            return None;
        }
        if message.ai_generated || message.text.trim().is_empty() {
            return None;
        }

        self.last_interaction_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);

        let writing_task = message.writing_task().map(str::to_string);
        let prior_turns = {
            let mut conversation = self.conversation.lock().await;
            let prior = conversation.turns();
            conversation.push(Turn::user(message.text.as_str()));
            prior
        };

        info!("Received message {} on {}", message.id, self.channel.cid());
        Some(PendingReply {
            text: message.text,
            writing_task,
            prior_turns,
        })
    }

    async fn respond(&self, pending: PendingReply) -> Option<HandlerOutcome> {
        let placeholder = match self.channel.send_message(OutgoingMessage::placeholder()).await {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to create reply placeholder: {}", e);
                return None;
            }
        };

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => Ok(HandlerOutcome::Stopped),
            result = self.generate(&pending, &placeholder) => result,
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Agent error for {}: {}", placeholder.id, e);
                if let Err(e) = self.indicate(AiState::Error, &placeholder).await {
                    warn!("Failed to send error indicator for {}: {}", placeholder.id, e);
                }
                Some(HandlerOutcome::Errored(e.to_string()))
            }
        }
    }

    async fn generate(
        &self,
        pending: &PendingReply,
        placeholder: &ChannelMessage,
    ) -> Result<HandlerOutcome> {
        self.indicate(AiState::Thinking, placeholder).await?;

        let system_prompt = writing_assistant_prompt(pending.writing_task.as_deref());
        let decision = self.decider.decide(&pending.text, &system_prompt).await;

        let preamble = match decision.search_query() {
            Some(query) => {
                self.indicate(AiState::ExternalSources, placeholder).await?;
                let results = self.search.search(query).await;
                debug!("{} returned {} bytes", self.search.name(), results.len());
                search_preamble(&system_prompt, &results)
            }
            None => system_prompt,
        };

        self.indicate(AiState::Generating, placeholder).await?;

        let mut handler = ResponseHandler::new(
            self.llm.clone(),
            self.channel.clone(),
            placeholder.clone(),
            self.handlers.clone(),
            self.shutdown.clone(),
            self.settings.flush_interval,
        );

        let options = RunOptions {
            preamble: Some(preamble),
            prior_turns: pending.prior_turns.clone(),
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
        };
        let outcome = handler.run(&pending.text, options).await;

        if let HandlerOutcome::Completed(text) = &outcome {
            if !text.is_empty() {
                self.conversation.lock().await.push(Turn::assistant(text.as_str()));
            }
        }
        Ok(outcome)
    }

    async fn indicate(&self, state: AiState, message: &ChannelMessage) -> Result<()> {
        self.channel
            .send_event(IndicatorEvent::update(state, message))
            .await
    }
}
