//! Quill CLI entry point

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use quill::adapters::cli::CliSession;
use quill::adapters::telegram::TelegramGateway;
use quill::agent::ProviderRegistry;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "🪶 Quill - streaming AI writing assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat with the assistant in the terminal
    Chat,

    /// Serve Telegram chats
    Gateway,

    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            println!("🪶 Initializing Quill...");
            if quill::config::onboard()? {
                println!("✓ Wrote {:?}", quill::config::config_path());
            } else {
                println!("✓ Config already exists at {:?}", quill::config::config_path());
            }
            println!("\nNext steps:");
            println!("  1. Add your Cohere API key (or set COHERE_API_KEY)");
            println!("  2. Optionally add a Tavily key for web search (TAVILY_API_KEY)");
            println!("  3. Chat: quill chat");
        }

        Commands::Chat => {
            let config = quill::config::load()?;
            println!("🪶 Interactive mode (/stop halts a reply, 'exit' quits)\n");
            let session = CliSession::start(&config).await?;
            session.run().await?;
        }

        Commands::Gateway => {
            let config = quill::config::load()?;
            if !config.telegram.enabled {
                println!("⚠️ Telegram is disabled in config. Enable it and set 'token' to run the gateway.");
                return Ok(());
            }

            println!("🪶 Starting Telegram gateway with model {}...", config.model);
            let gateway = Arc::new(TelegramGateway::connect(config).await?);
            println!("✓ Gateway started. Listening for Telegram messages...");
            gateway.run().await?;
        }

        Commands::Status => {
            let config = quill::config::load()?;
            let check = |set: bool| if set { "✓".green() } else { "✗".red() };

            println!("🪶 Quill Status\n");
            println!("Config: {:?}", quill::config::config_path());
            println!("Provider: {} (available: {})", config.provider, ProviderRegistry::available().join(", "));
            println!("Model: {}", config.model);
            println!("Cohere key: {}", check(config.has_cohere_key()));
            println!("Search key: {}", check(config.search.key().is_some()));
            println!(
                "Telegram: {}",
                if config.telegram.enabled { "enabled" } else { "disabled" }
            );
        }
    }

    Ok(())
}
