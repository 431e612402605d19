//! In-process chat channel.
//!
//! Keeps messages in memory, delivers inbound events over a broadcast
//! channel, and records every outbound operation in order. The CLI renders
//! from [`LocalChannel::updates`]; tests assert on [`LocalChannel::log`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{ChannelEvent, ChannelMessage, ChatChannel, IndicatorEvent, OutgoingMessage, Subscription};
use crate::error::Error;
use crate::Result;

const EVENT_CAPACITY: usize = 256;

/// Operations kept by [`LocalChannel::log`] unless configured otherwise.
const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Outbound operation performed on a [`LocalChannel`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    MessageSent(ChannelMessage),
    MessageUpdated { message_id: String, text: String },
    Event(IndicatorEvent),
    Disconnected,
}

#[derive(Default)]
struct LocalState {
    user_id: Option<String>,
    messages: HashMap<String, ChannelMessage>,
    log: VecDeque<ChannelUpdate>,
}

/// In-memory [`ChatChannel`].
pub struct LocalChannel {
    cid: String,
    events: broadcast::Sender<ChannelEvent>,
    updates: broadcast::Sender<ChannelUpdate>,
    state: Mutex<LocalState>,
    watching: AtomicBool,
    fail_updates: AtomicBool,
    log_capacity: usize,
}

impl LocalChannel {
    /// Create a channel with id `{channel_type}:{channel_id}`.
    pub fn new(channel_type: &str, channel_id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (updates, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cid: format!("{}:{}", channel_type, channel_id),
            events,
            updates,
            state: Mutex::new(LocalState::default()),
            watching: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Keep at most `capacity` operations in the log, dropping the oldest.
    /// Zero disables the log; the [`updates`](Self::updates) feed is unaffected.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Post a message as a human user and deliver `message.new`.
    pub async fn post_user_message(&self, user_id: &str, text: &str) -> ChannelMessage {
        let message = ChannelMessage {
            id: Uuid::new_v4().to_string(),
            cid: self.cid.clone(),
            text: text.to_string(),
            user_id: Some(user_id.to_string()),
            ai_generated: false,
            custom: HashMap::new(),
        };
        self.deliver(ChannelEvent::MessageNew {
            message: message.clone(),
        })
        .await;
        message
    }

    /// Deliver a `ai_indicator.stop` for a message.
    pub async fn request_stop(&self, message_id: &str) {
        self.deliver(ChannelEvent::IndicatorStop {
            message_id: message_id.to_string(),
        })
        .await;
    }

    /// Deliver an arbitrary inbound event.
    pub async fn deliver(&self, event: ChannelEvent) {
        if let ChannelEvent::MessageNew { message } = &event {
            let mut state = self.state.lock().await;
            state.messages.insert(message.id.clone(), message.clone());
        }
        // No subscribers is not an error: nobody is listening yet.
        let _ = self.events.send(event);
    }

    /// Live feed of outbound operations.
    pub fn updates(&self) -> broadcast::Receiver<ChannelUpdate> {
        self.updates.subscribe()
    }

    /// Logged outbound operations, oldest first.
    pub async fn log(&self) -> Vec<ChannelUpdate> {
        self.state.lock().await.log.iter().cloned().collect()
    }

    /// Current state of a message.
    pub async fn message(&self, message_id: &str) -> Option<ChannelMessage> {
        self.state.lock().await.messages.get(message_id).cloned()
    }

    /// Connected user, if any.
    pub async fn user_id(&self) -> Option<String> {
        self.state.lock().await.user_id.clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Make subsequent text updates fail (simulates a host outage).
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn record(&self, state: &mut LocalState, update: ChannelUpdate) {
        if self.log_capacity > 0 {
            if state.log.len() == self.log_capacity {
                state.log.pop_front();
            }
            state.log.push_back(update.clone());
        }
        let _ = self.updates.send(update);
    }
}

#[async_trait]
impl ChatChannel for LocalChannel {
    fn name(&self) -> &str {
        "local"
    }

    fn cid(&self) -> &str {
        &self.cid
    }

    async fn connect(&self, user_id: &str) -> Result<()> {
        self.state.lock().await.user_id = Some(user_id.to_string());
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        self.watching.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<ChannelMessage> {
        let mut state = self.state.lock().await;
        let stored = ChannelMessage {
            id: Uuid::new_v4().to_string(),
            cid: self.cid.clone(),
            text: message.text,
            user_id: state.user_id.clone(),
            ai_generated: message.ai_generated,
            custom: HashMap::new(),
        };
        state.messages.insert(stored.id.clone(), stored.clone());
        self.record(&mut state, ChannelUpdate::MessageSent(stored.clone()));
        Ok(stored)
    }

    async fn update_message_text(&self, message_id: &str, text: &str) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::Channel("message update rejected".to_string()));
        }

        let mut state = self.state.lock().await;
        let message = state
            .messages
            .get_mut(message_id)
            .ok_or_else(|| Error::Channel(format!("Unknown message: {message_id}")))?;
        message.text = text.to_string();

        debug!("Updated message {} ({} chars)", message_id, text.len());
        self.record(
            &mut state,
            ChannelUpdate::MessageUpdated {
                message_id: message_id.to_string(),
                text: text.to_string(),
            },
        );
        Ok(())
    }

    async fn send_event(&self, event: IndicatorEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        self.record(&mut state, ChannelUpdate::Event(event));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user_id = None;
        self.watching.store(false, Ordering::SeqCst);
        self.record(&mut state, ChannelUpdate::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AiState;

    #[tokio::test]
    async fn test_send_and_update_message() {
        let channel = LocalChannel::new("messaging", "test");
        channel.connect("writer-bot").await.unwrap();

        let sent = channel.send_message(OutgoingMessage::placeholder()).await.unwrap();
        assert!(sent.ai_generated);
        assert_eq!(sent.cid, "messaging:test");
        assert_eq!(sent.user_id.as_deref(), Some("writer-bot"));

        channel.update_message_text(&sent.id, "Hello").await.unwrap();
        assert_eq!(channel.message(&sent.id).await.unwrap().text, "Hello");

        assert!(channel.update_message_text("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_receives_events() {
        let channel = LocalChannel::new("messaging", "test");
        let mut sub = channel.subscribe();

        let posted = channel.post_user_message("alice", "Hi").await;
        channel.request_stop("m1").await;

        match sub.recv().await {
            Some(ChannelEvent::MessageNew { message }) => assert_eq!(message, posted),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::IndicatorStop { message_id: "m1".to_string() })
        );
    }

    #[tokio::test]
    async fn test_log_records_in_order() {
        let channel = LocalChannel::new("messaging", "test");
        let sent = channel.send_message(OutgoingMessage::placeholder()).await.unwrap();
        channel
            .send_event(IndicatorEvent::update(AiState::Thinking, &sent))
            .await
            .unwrap();
        channel.disconnect().await.unwrap();

        let log = channel.log().await;
        assert_eq!(log.len(), 3);
        assert!(matches!(log[0], ChannelUpdate::MessageSent(_)));
        assert!(matches!(log[1], ChannelUpdate::Event(IndicatorEvent::Update { .. })));
        assert_eq!(log[2], ChannelUpdate::Disconnected);
    }

    #[tokio::test]
    async fn test_log_capacity_drops_oldest() {
        let channel = LocalChannel::new("messaging", "test").with_log_capacity(2);
        let sent = channel.send_message(OutgoingMessage::placeholder()).await.unwrap();
        for text in ["a", "ab", "abc"] {
            channel.update_message_text(&sent.id, text).await.unwrap();
        }

        let log = channel.log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(
            log[1],
            ChannelUpdate::MessageUpdated {
                message_id: sent.id.clone(),
                text: "abc".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_log_still_feeds_updates() {
        let channel = LocalChannel::new("cli", "default").with_log_capacity(0);
        let mut updates = channel.updates();

        let sent = channel.send_message(OutgoingMessage::placeholder()).await.unwrap();

        assert!(channel.log().await.is_empty());
        assert_eq!(updates.recv().await.unwrap(), ChannelUpdate::MessageSent(sent));
    }
}
