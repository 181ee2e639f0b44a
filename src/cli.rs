// src/cli.rs
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::core::config_manager::{ConfigManager, EnvStatus};
use crate::core::connectivity::{banner_message, ConnectivitySignal};
use crate::core::health::check_health;
use crate::core::service_client::ServiceClient;
use crate::core::transport::UploadFile;
use crate::messaging::{ChatSynchronizer, Inbox, MessagingClient};
use crate::session::{SessionResolver, StaticTokenProvider};
use crate::utils::{truncate_preview, DEFAULT_PAGE_LIMIT};

#[derive(Parser)]
#[command(name = "recruiter-sync")]
#[command(about = "Check connectivity, resolve the signed-in user and sync conversations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Access token; falls back to RECRUITER_ACCESS_TOKEN
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Report backend and identity-provider status
    Health,
    /// Show the identity and role behind the access token
    Whoami,
    /// List conversations with unread counts
    Conversations,
    /// Get or create the conversation with another user
    With { user_id: String },
    /// Print one page of a conversation's history
    Messages {
        conversation_id: String,
        #[arg(long)]
        before: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
    /// Open a conversation and follow it for a number of poll cycles
    Open {
        conversation_id: String,
        #[arg(long, default_value_t = 3)]
        polls: u32,
    },
    /// Send a message to a conversation
    Send {
        conversation_id: String,
        content: String,
    },
    /// Upload a file to an API endpoint as multipart `file`
    Upload { endpoint: String, file: PathBuf },
}

struct Runtime {
    config: ConfigManager,
    client: ServiceClient,
    resolver: SessionResolver,
    token: Option<String>,
}

impl Runtime {
    async fn token(&self) -> Result<String> {
        let provider = StaticTokenProvider::new(self.token.clone());
        let snapshot = self.resolver.initialize(&provider).await;
        if !snapshot.is_signed_in() {
            bail!("No valid access token. Pass --token or set RECRUITER_ACCESS_TOKEN.");
        }
        self.resolver
            .access_token()
            .context("Session ended before the command could run")
    }
}

pub async fn handle_command(cli: Cli) -> Result<()> {
    let config = ConfigManager::load_from(&cli.config, |key| std::env::var(key).ok())?;
    if config.env_status() == EnvStatus::MissingIdentityProvider {
        eprintln!("{}", config.setup_message());
    }

    let signal = ConnectivitySignal::new();
    let _banner = signal.subscribe(|status| {
        if let Some(message) = banner_message(*status) {
            eprintln!("⚠️  {}", message);
        }
    });

    let client = ServiceClient::from_config(&config, signal)?;
    let resolver = SessionResolver::new(client.clone());
    let token = cli.token.or_else(|| config.service.access_token.clone());
    let ctx = Runtime {
        config,
        client,
        resolver,
        token,
    };
    let messaging = MessagingClient::new(ctx.client.clone());

    match cli.command {
        Command::Health => {
            let report = check_health(&ctx.client, &ctx.config).await;
            print_json(&report)?;
        }

        Command::Whoami => {
            ctx.token().await?;
            let snapshot = ctx.resolver.snapshot();
            if let Some(identity) = &snapshot.identity {
                println!("User:  {}", identity.user_id);
                println!("Email: {}", identity.email.as_deref().unwrap_or("-"));
            }
            match snapshot.role {
                Some(role) => println!("Role:  {}", role),
                None => println!("Role:  unresolved"),
            }
        }

        Command::Conversations => {
            let token = ctx.token().await?;
            let inbox = Inbox::new(messaging);
            let conversations = inbox.refresh(&token).await;
            if conversations.is_empty() {
                println!("No conversations.");
            } else {
                println!("{:<38} {:<24} {:>6}  {}", "ID", "With", "Unread", "Last message");
                println!("{}", "-".repeat(100));
                for c in &conversations {
                    println!(
                        "{:<38} {:<24} {:>6}  {}",
                        c.id,
                        truncate_preview(&c.other_name, 24),
                        c.unread_count,
                        truncate_preview(c.last_message_preview.as_deref().unwrap_or(""), 30)
                    );
                }
                println!("\nTotal unread: {}", inbox.total_unread());
            }
        }

        Command::With { user_id } => {
            let token = ctx.token().await?;
            let handle = Inbox::new(messaging).open_with(&user_id, &token).await?;
            print_json(&handle)?;
        }

        Command::Messages {
            conversation_id,
            before,
            limit,
        } => {
            let token = ctx.token().await?;
            let messages = messaging
                .try_list_messages(&conversation_id, &token, before.as_deref(), limit)
                .await?;
            print_json(&messages)?;
        }

        Command::Open {
            conversation_id,
            polls,
        } => {
            let token = ctx.token().await?;
            let inbox = Inbox::new(messaging.clone());
            inbox.refresh(&token).await;
            let handle = inbox
                .handle_for(&conversation_id)
                .with_context(|| format!("Conversation {} not found", conversation_id))?;

            let interval = ctx.config.poll_interval();
            let chat = ChatSynchronizer::new(messaging, interval);
            let view = chat.open(handle, token).await;
            info!("Loaded {} messages", view.messages.len());
            for message in &view.messages {
                println!("[{}] {}: {}", format_time(message), message.sender_id, message.content);
            }

            let mut rx = chat.watch();
            let mut shown = view.messages.len();
            for _ in 0..polls {
                tokio::time::sleep(interval).await;
                if !rx.has_changed().unwrap_or(false) {
                    continue;
                }
                let view = rx.borrow_and_update().clone();
                for message in view.messages.iter().skip(shown) {
                    println!("[{}] {}: {}", format_time(message), message.sender_id, message.content);
                }
                shown = view.messages.len();
            }
            chat.close();
        }

        Command::Send {
            conversation_id,
            content,
        } => {
            let token = ctx.token().await?;
            let message = messaging
                .send_message(&conversation_id, &content, &token)
                .await?;
            print_json(&message)?;
        }

        Command::Upload { endpoint, file } => {
            let token = ctx.token().await?;
            let upload = UploadFile::from_path(&file).await?;
            let response: serde_json::Value = ctx
                .client
                .request_multipart(&endpoint, upload, Some(&token))
                .await?;
            print_json(&response)?;
        }
    }

    if ctx.client.session_expiries().get() > 0 {
        warn!("The session expired during this command; sign in again");
    }
    Ok(())
}

fn format_time(message: &crate::types::Message) -> String {
    message
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render output")?
    );
    Ok(())
}
