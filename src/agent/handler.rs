//! Response streaming.
//!
//! A [`ResponseHandler`] owns one streamed reply: it opens a completion
//! stream, accumulates text, pushes rate-limited partial updates to the host
//! message, and ends in exactly one of [`HandlerOutcome`]'s states.
//!
//! Stop requests arrive through a [`CancellationToken`] handed out by the
//! [`HandlerRegistry`]. They are honored at stream-read boundaries, so a write
//! already in flight completes but nothing is written afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::llm::{ChatRequest, LlmClient, StreamEvent};
use super::message::Turn;
use crate::adapters::{AiState, ChannelMessage, ChatChannel, IndicatorEvent};
use crate::error::Error;

/// Text shown when an error carries no message of its own.
const GENERIC_ERROR_TEXT: &str = "Error generating the message";

/// Terminal state of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Stream finished; carries the full reply text.
    Completed(String),
    /// Stream failed; carries the text written to the message.
    Errored(String),
    /// Stopped by the user or torn down with the session.
    Stopped,
}

/// Options for one streamed reply.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub preamble: Option<String>,
    pub prior_turns: Vec<Turn>,
    pub model: String,
    pub temperature: f32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            preamble: None,
            prior_turns: Vec::new(),
            model: "command-r-plus".to_string(),
            temperature: 0.7,
        }
    }
}

/// Live handlers of one agent, keyed by target message id.
///
/// Only the owning agent registers and stops entries; a handler removes its
/// own entry when it is disposed.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for `message_id` and return its stop token.
    pub fn register(&self, message_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(message_id.to_string(), token.clone());
        token
    }

    /// Request a stop for the handler bound to `message_id`.
    ///
    /// Returns `false` if no live handler matches.
    pub fn stop(&self, message_id: &str) -> bool {
        match self.lock().get(message_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `message_id`.
    pub fn remove(&self, message_id: &str) {
        self.lock().remove(message_id);
    }

    /// Remove every entry, returning the stop tokens.
    pub fn drain(&self) -> Vec<CancellationToken> {
        self.lock().drain().map(|(_, token)| token).collect()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Streams one reply into one host message.
pub struct ResponseHandler {
    llm: Arc<dyn LlmClient>,
    channel: Arc<dyn ChatChannel>,
    message: ChannelMessage,
    flush_interval: Duration,
    stop: CancellationToken,
    teardown: CancellationToken,
    registry: HandlerRegistry,

    text: String,
    last_flush: Option<Instant>,
    done: bool,
    stopped: bool,
}

impl ResponseHandler {
    /// Create a handler for `message` and register it in `registry`.
    ///
    /// `teardown` is the owning session's token: once cancelled the handler
    /// ends silently, without writing to the channel.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        channel: Arc<dyn ChatChannel>,
        message: ChannelMessage,
        registry: HandlerRegistry,
        teardown: CancellationToken,
        flush_interval: Duration,
    ) -> Self {
        let stop = registry.register(&message.id);
        Self {
            llm,
            channel,
            message,
            flush_interval,
            stop,
            teardown,
            registry,
            text: String::new(),
            last_flush: None,
            done: false,
            stopped: false,
        }
    }

    /// Target message id.
    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stream a reply to `prompt` into the target message.
    pub async fn run(&mut self, prompt: &str, options: RunOptions) -> HandlerOutcome {
        if self.done {
            return HandlerOutcome::Stopped;
        }

        let mut request = ChatRequest::new(options.model, prompt)
            .with_history(options.prior_turns)
            .with_temperature(options.temperature);
        request.preamble = options.preamble;

        let opened = tokio::select! {
            biased;
            _ = self.teardown.cancelled() => return self.abandon(),
            _ = self.stop.cancelled() => return self.halt().await,
            opened = self.llm.chat_stream(&request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return self.fail(e).await,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.teardown.cancelled() => return self.abandon(),
                _ = self.stop.cancelled() => return self.halt().await,
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Err(e)) => return self.fail(e).await,
                Some(Ok(StreamEvent::TextGeneration { text })) => {
                    self.text.push_str(&text);
                    if self.flush_due() {
                        if let Err(e) = self.flush().await {
                            return self.fail(e).await;
                        }
                    }
                }
                Some(Ok(event)) => debug!("Ignoring stream event {:?}", event),
            }
        }

        // A stop that raced the end of the stream still wins.
        if self.teardown.is_cancelled() {
            return self.abandon();
        }
        if self.stop.is_cancelled() {
            return self.halt().await;
        }

        if let Err(e) = self.flush().await {
            return self.fail(e).await;
        }

        if let Err(e) = self.channel.send_event(IndicatorEvent::clear(&self.message)).await {
            warn!("Failed to clear indicator for {}: {}", self.message.id, e);
        }

        info!(
            "Reply {} completed ({} chars)",
            self.message.id,
            self.text.len()
        );
        self.dispose();
        HandlerOutcome::Completed(self.text.clone())
    }

    /// Release the handler. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.registry.remove(&self.message.id);
    }

    fn flush_due(&self) -> bool {
        match self.last_flush {
            None => true,
            Some(at) => at.elapsed() >= self.flush_interval,
        }
    }

    async fn flush(&mut self) -> crate::Result<()> {
        self.channel
            .update_message_text(&self.message.id, &self.text)
            .await?;
        self.last_flush = Some(Instant::now());
        debug!("Flushed {} chars to {}", self.text.len(), self.message.id);
        Ok(())
    }

    /// User stop: clear the indicator, write nothing else.
    async fn halt(&mut self) -> HandlerOutcome {
        self.stopped = true;
        info!("Stop generating for message {}", self.message.id);

        if let Err(e) = self.channel.send_event(IndicatorEvent::clear(&self.message)).await {
            warn!("Failed to clear indicator for {}: {}", self.message.id, e);
        }
        self.dispose();
        HandlerOutcome::Stopped
    }

    /// Session teardown: end without touching the channel.
    fn abandon(&mut self) -> HandlerOutcome {
        self.stopped = true;
        debug!("Abandoning reply {} on teardown", self.message.id);
        self.dispose();
        HandlerOutcome::Stopped
    }

    async fn fail(&mut self, err: Error) -> HandlerOutcome {
        error!("Error streaming reply {}: {}", self.message.id, err);

        let mut text = err.to_string();
        if text.trim().is_empty() {
            text = GENERIC_ERROR_TEXT.to_string();
        }

        if let Err(e) = self
            .channel
            .send_event(IndicatorEvent::update(AiState::Error, &self.message))
            .await
        {
            warn!("Failed to send error indicator for {}: {}", self.message.id, e);
        }
        if let Err(e) = self.channel.update_message_text(&self.message.id, &text).await {
            warn!("Failed to write error text to {}: {}", self.message.id, e);
        }

        self.dispose();
        HandlerOutcome::Errored(text)
    }
}

impl Drop for ResponseHandler {
    fn drop(&mut self) {
        self.dispose();
    }
}
