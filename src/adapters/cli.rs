//! CLI adapter: interactive terminal chat over a [`LocalChannel`].
//!
//! Typed lines are posted as user messages. Replies are rendered from the
//! channel's update feed as they stream in. `/stop` halts the reply in flight.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::local::{ChannelUpdate, LocalChannel};
use super::{AiState, IndicatorEvent};
use crate::agent::{create_agent, Agent};
use crate::config::Config;
use crate::Result;

const AGENT_USER: &str = "quill";
const HUMAN_USER: &str = "cli-user";

/// Turns channel updates into terminal output.
///
/// Streamed updates carry the full text so far; only the new suffix is
/// printed. A rewrite that does not extend the printed text (e.g. an error
/// message) is printed on its own line.
#[derive(Debug, Default)]
struct Transcript {
    printed: HashMap<String, String>,
    latest: Option<String>,
}

impl Transcript {
    fn render(&mut self, update: &ChannelUpdate) -> Option<String> {
        match update {
            ChannelUpdate::MessageSent(message) if message.ai_generated => {
                self.latest = Some(message.id.clone());
                self.printed.insert(message.id.clone(), message.text.clone());
                Some(format!("\n{}: {}", "Bot".green().bold(), message.text))
            }
            ChannelUpdate::MessageUpdated { message_id, text } => {
                let printed = self.printed.entry(message_id.clone()).or_default();
                let out = match text.strip_prefix(printed.as_str()) {
                    Some(suffix) => suffix.to_string(),
                    None => format!("\n{}", text),
                };
                *printed = text.clone();
                (!out.is_empty()).then_some(out)
            }
            ChannelUpdate::Event(IndicatorEvent::Update { ai_state, .. }) => match ai_state {
                AiState::ExternalSources => Some(format!("{} ", "(searching the web…)".dimmed())),
                AiState::Error => Some(format!("\n{}: ", "Error".red().bold())),
                AiState::Thinking | AiState::Generating => None,
            },
            ChannelUpdate::Event(IndicatorEvent::Clear { message_id, .. }) => {
                if self.latest.as_deref() == Some(message_id.as_str()) {
                    self.latest = None;
                }
                Some("\n".to_string())
            }
            _ => None,
        }
    }

    /// Reply currently streaming, if any.
    fn latest(&self) -> Option<&str> {
        self.latest.as_deref()
    }
}

async fn render(mut updates: broadcast::Receiver<ChannelUpdate>, transcript: Arc<Mutex<Transcript>>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Some(out) = transcript.lock().await.render(&update) {
                    print!("{}", out);
                    let _ = io::stdout().flush();
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Renderer skipped {} updates", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Interactive session bound to one agent.
pub struct CliSession {
    channel: Arc<LocalChannel>,
    agent: Agent,
}

impl CliSession {
    /// Create the channel and agent and start listening.
    pub async fn start(config: &Config) -> Result<Self> {
        let channel = Arc::new(LocalChannel::new("cli", "default").with_log_capacity(0));
        let agent = create_agent(config, channel.clone(), AGENT_USER).await?;
        agent.init().await?;
        Ok(Self { channel, agent })
    }

    /// Run the REPL until `exit`, `quit`, EOF or Ctrl+C.
    pub async fn run(self) -> Result<()> {
        let transcript = Arc::new(Mutex::new(Transcript::default()));
        let renderer = tokio::spawn(render(self.channel.updates(), transcript.clone()));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}: ", "You".blue().bold());
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break; // EOF
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
                break;
            }

            if input == "/stop" {
                let latest = transcript.lock().await.latest().map(str::to_string);
                match latest {
                    Some(message_id) => self.channel.request_stop(&message_id).await,
                    None => println!("Nothing to stop."),
                }
                continue;
            }

            self.channel.post_user_message(HUMAN_USER, input).await;
        }

        println!("\n👋 Bye!");
        let result = self.agent.dispose().await;
        renderer.abort();
        result
    }
}
