//! Telegram adapter using teloxide
//!
//! Every Telegram chat gets its own [`TelegramChannel`] and [`Agent`], created
//! on the first message. Replies stream into a bot message by editing it; a
//! "Stop" button under the message maps to `ai_indicator.stop`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use teloxide::{ApiError, RequestError};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::{
    AiState, ChannelEvent, ChannelMessage, ChatChannel, IndicatorEvent, OutgoingMessage,
    Subscription,
};
use crate::agent::{create_agent, Agent};
use crate::config::Config;
use crate::error::Error;
use crate::Result;

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Callback data carried by the stop button.
const STOP_CALLBACK: &str = "stop";

/// Shown while the reply is still empty (Telegram refuses empty messages).
const PLACEHOLDER_TEXT: &str = "…";

const SEARCHING_TEXT: &str = "🔎 Searching the web…";

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const EVENT_CAPACITY: usize = 64;

fn stop_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "⏹ Stop",
        STOP_CALLBACK,
    )]])
}

/// Clip text to Telegram's message limit.
fn clip(text: &str) -> String {
    text.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Check a sender against the allow list. An empty list allows everyone.
fn is_allowed(allow_from: &[String], username: Option<&str>, user_id: &str) -> bool {
    if allow_from.is_empty() {
        return true;
    }
    allow_from
        .iter()
        .any(|allowed| Some(allowed.as_str()) == username || allowed == user_id)
}

fn parse_message_id(message_id: &str) -> Result<MessageId> {
    message_id
        .parse::<i32>()
        .map(MessageId)
        .map_err(|_| Error::Channel(format!("Invalid Telegram message id: {message_id}")))
}

/// Treat "message is not modified" as success; Telegram raises it for no-op edits.
fn ignore_not_modified<T>(result: std::result::Result<T, RequestError>) -> Result<()> {
    match result {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Default)]
struct ReplyState {
    last_text: HashMap<String, String>,
    finished: HashSet<String>,
}

/// One Telegram chat as a [`ChatChannel`].
pub struct TelegramChannel {
    bot: Bot,
    chat_id: ChatId,
    cid: String,
    events: broadcast::Sender<ChannelEvent>,
    replies: Mutex<ReplyState>,
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bot,
            chat_id,
            cid: format!("telegram:{}", chat_id),
            events,
            replies: Mutex::new(ReplyState::default()),
        }
    }

    /// Hand an inbound event to the agent.
    pub fn deliver(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            debug!("No agent listening on {}", self.cid);
        }
    }

    async fn remove_keyboard(&self, message_id: &str) -> Result<()> {
        self.replies.lock().await.finished.insert(message_id.to_string());
        let id = parse_message_id(message_id)?;
        ignore_not_modified(
            self.bot
                .edit_message_reply_markup(self.chat_id, id)
                .await,
        )
    }
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn cid(&self) -> &str {
        &self.cid
    }

    async fn connect(&self, user_id: &str) -> Result<()> {
        debug!("Telegram chat {} bound to bot user {}", self.chat_id, user_id);
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<ChannelMessage> {
        let text = if message.text.trim().is_empty() {
            PLACEHOLDER_TEXT.to_string()
        } else {
            clip(&message.text)
        };

        let sent = self
            .bot
            .send_message(self.chat_id, text.clone())
            .reply_markup(stop_keyboard())
            .await?;

        let id = sent.id.0.to_string();
        self.replies.lock().await.last_text.insert(id.clone(), text);

        Ok(ChannelMessage {
            id,
            cid: self.cid.clone(),
            text: message.text,
            user_id: None,
            ai_generated: message.ai_generated,
            custom: HashMap::new(),
        })
    }

    async fn update_message_text(&self, message_id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let text = clip(text);

        let keep_keyboard = {
            let mut replies = self.replies.lock().await;
            if replies.last_text.get(message_id) == Some(&text) {
                return Ok(());
            }
            replies.last_text.insert(message_id.to_string(), text.clone());
            !replies.finished.contains(message_id)
        };

        let id = parse_message_id(message_id)?;
        let request = self.bot.edit_message_text(self.chat_id, id, text);
        let result = if keep_keyboard {
            request.reply_markup(stop_keyboard()).await
        } else {
            request.await
        };
        ignore_not_modified(result)
    }

    async fn send_event(&self, event: IndicatorEvent) -> Result<()> {
        match event {
            IndicatorEvent::Update {
                ai_state: AiState::Thinking | AiState::Generating,
                ..
            } => {
                self.bot
                    .send_chat_action(self.chat_id, ChatAction::Typing)
                    .await?;
                Ok(())
            }
            IndicatorEvent::Update {
                ai_state: AiState::ExternalSources,
                message_id,
                ..
            } => {
                self.bot
                    .send_chat_action(self.chat_id, ChatAction::Typing)
                    .await?;
                self.update_message_text(&message_id, SEARCHING_TEXT).await
            }
            IndicatorEvent::Update {
                ai_state: AiState::Error,
                message_id,
                ..
            }
            | IndicatorEvent::Clear { message_id, .. } => self.remove_keyboard(&message_id).await,
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut replies = self.replies.lock().await;
        replies.last_text.clear();
        replies.finished.clear();
        debug!("Telegram chat {} disconnected", self.chat_id);
        Ok(())
    }
}

#[derive(Clone)]
struct ChatSession {
    channel: Arc<TelegramChannel>,
    agent: Arc<Agent>,
}

/// Routes Telegram updates to per-chat agents.
pub struct TelegramGateway {
    bot: Bot,
    config: Config,
    agent_user_id: String,
    sessions: Mutex<HashMap<ChatId, ChatSession>>,
}

impl TelegramGateway {
    /// Create a gateway after checking the bot token with Telegram.
    pub async fn connect(config: Config) -> Result<Self> {
        if config.telegram.token.trim().is_empty() {
            return Err(Error::Config("Telegram token is not set".to_string()));
        }

        let bot = Bot::new(&config.telegram.token);
        let me = bot.get_me().await?;
        info!("Connected to Telegram as @{}", me.username());

        Ok(Self {
            bot,
            agent_user_id: me.id.to_string(),
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Number of chats with a live agent.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session(&self, chat_id: ChatId) -> Result<ChatSession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&chat_id) {
            return Ok(session.clone());
        }

        let channel = Arc::new(TelegramChannel::new(self.bot.clone(), chat_id));
        let agent = create_agent(&self.config, channel.clone(), &self.agent_user_id).await?;
        agent.init().await?;

        info!("Started agent for Telegram chat {}", chat_id);
        let session = ChatSession {
            channel,
            agent: Arc::new(agent),
        };
        sessions.insert(chat_id, session.clone());
        Ok(session)
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let chat_id = message.chat.id;
        let user = message.from();

        let Some(user) = user else {
            return Ok(());
        };
        if !is_allowed(
            &self.config.telegram.allow_from,
            user.username.as_deref(),
            &user.id.to_string(),
        ) {
            debug!("Ignoring message from unauthorized user: {:?}", user.username);
            return Ok(());
        }

        let Some(text) = message.text() else {
            return Ok(()); // Ignore non-text messages
        };

        info!("Received message from {}: {} chars", chat_id, text.len());

        let session = self.session(chat_id).await?;
        session.channel.deliver(ChannelEvent::MessageNew {
            message: ChannelMessage {
                id: message.id.0.to_string(),
                cid: session.channel.cid().to_string(),
                text: text.to_string(),
                user_id: Some(user.id.to_string()),
                ai_generated: user.is_bot,
                custom: HashMap::new(),
            },
        });
        Ok(())
    }

    async fn handle_callback(&self, query: CallbackQuery) -> Result<()> {
        self.bot.answer_callback_query(query.id.clone()).await?;

        if query.data.as_deref() != Some(STOP_CALLBACK) {
            return Ok(());
        }
        let Some(message) = query.message else {
            return Ok(());
        };

        let session = self.sessions.lock().await.get(&message.chat.id).cloned();
        match session {
            Some(session) => session.channel.deliver(ChannelEvent::IndicatorStop {
                message_id: message.id.0.to_string(),
            }),
            None => debug!("Stop pressed in chat {} without an agent", message.chat.id),
        }
        Ok(())
    }

    /// Dispose agents idle for longer than `idle`. Returns how many were removed.
    pub async fn sweep_idle(&self, idle: Duration) -> usize {
        let now = Utc::now();
        let expired: Vec<(ChatId, ChatSession)> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<ChatId> = sessions
                .iter()
                .filter(|(_, s)| {
                    (now - s.agent.last_interaction())
                        .to_std()
                        .map(|elapsed| elapsed >= idle)
                        .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };

        for (chat_id, session) in &expired {
            info!("Disposing idle agent for Telegram chat {}", chat_id);
            if let Err(e) = session.agent.dispose().await {
                warn!("Failed to dispose agent for {}: {}", chat_id, e);
            }
        }
        expired.len()
    }

    /// Dispose every agent.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (chat_id, session) in sessions {
            if let Err(e) = session.agent.dispose().await {
                warn!("Failed to dispose agent for {}: {}", chat_id, e);
            }
        }
    }

    /// Run until Ctrl+C, then dispose every agent.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let idle = self.config.idle_timeout();
        let sweeper = {
            let gateway = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    gateway.sweep_idle(idle).await;
                }
            })
        };

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(
                |msg: Message, gateway: Arc<TelegramGateway>| async move {
                    if let Err(e) = gateway.handle_message(msg).await {
                        error!("Error handling telegram message: {}", e);
                    }
                    respond(())
                },
            ))
            .branch(Update::filter_callback_query().endpoint(
                |query: CallbackQuery, gateway: Arc<TelegramGateway>| async move {
                    if let Err(e) = gateway.handle_callback(query).await {
                        error!("Error handling telegram callback: {}", e);
                    }
                    respond(())
                },
            ));

        info!("Starting Telegram gateway...");
        Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.clone()])
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        sweeper.abort();
        self.shutdown().await;
        info!("Telegram gateway stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_allowed() {
        let allow = vec!["alice".to_string(), "42".to_string()];
        assert!(is_allowed(&allow, Some("alice"), "1"));
        assert!(is_allowed(&allow, None, "42"));
        assert!(!is_allowed(&allow, Some("mallory"), "7"));
        assert!(is_allowed(&[], None, "7"));
    }

    #[test]
    fn test_clip_respects_char_limit() {
        let long = "é".repeat(MAX_MESSAGE_CHARS + 10);
        assert_eq!(clip(&long).chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn test_parse_message_id() {
        assert_eq!(parse_message_id("17").unwrap(), MessageId(17));
        assert!(matches!(parse_message_id("abc"), Err(Error::Channel(_))));
    }

    #[tokio::test]
    async fn test_channel_ids_and_delivery() {
        let channel = TelegramChannel::new(Bot::new("123:TEST"), ChatId(99));
        assert_eq!(channel.cid(), "telegram:99");

        let mut sub = channel.subscribe();
        channel.deliver(ChannelEvent::IndicatorStop {
            message_id: "5".to_string(),
        });
        assert_eq!(
            sub.recv().await,
            Some(ChannelEvent::IndicatorStop { message_id: "5".to_string() })
        );
    }

    #[tokio::test]
    async fn test_empty_update_is_skipped() {
        // No request is made for empty text, so no network is needed.
        let channel = TelegramChannel::new(Bot::new("123:TEST"), ChatId(99));
        channel.update_message_text("5", "   ").await.unwrap();
    }
}
