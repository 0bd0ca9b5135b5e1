//! Klians Daemon
//!
//! Headless host for the Klians client core: loads the configuration,
//! signs the configured account into a [`Session`] and logs feed, message
//! and announcement activity until interrupted.

mod config;
mod diagnostics;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use config::Config;
use diagnostics::{Cli, Command};
use klians_core::models::username_from_email;
use klians_core::render::FeedEntryView;
use klians_core::{
    ApiClient, EventKind, FeedItem, HttpApiClient, RealtimeEvent, Session, UserSummary,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Pick the configured account out of user search results
///
/// With a configured `user_id` only that record qualifies; otherwise the
/// first record whose email matches case-insensitively.
fn pick_viewer(matches: Vec<UserSummary>, email: &str, user_id: Option<&str>) -> Option<UserSummary> {
    matches.into_iter().find(|user| match user_id {
        Some(id) => user.id == id,
        None => user
            .email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(email)),
    })
}

/// Work out who the configured account is
///
/// The email is looked up through the user search. A configured `user_id`
/// picks among the results and, when the lookup fails or finds nothing,
/// stands in with a summary built from the email.
async fn resolve_viewer(config: &Config, client_id: &str) -> Result<UserSummary> {
    let email = config.account.email.trim();
    if email.is_empty() {
        bail!(
            "No account configured. Set [account] email in {}",
            config.config_path().display()
        );
    }
    let user_id = config.account.user_id.as_deref();

    let lookup = HttpApiClient::new(config.api_config(client_id.to_string()), None)
        .context("Failed to create API client")?;
    let matches = match (lookup.search_users_by_email(email).await, user_id) {
        (Ok(matches), _) => matches,
        (Err(e), Some(_)) => {
            warn!("Account lookup failed: {}", e);
            Vec::new()
        }
        (Err(e), None) => return Err(e).context("Failed to look up account"),
    };

    match (pick_viewer(matches, email, user_id), user_id) {
        (Some(viewer), _) => Ok(viewer),
        (None, Some(user_id)) => {
            warn!(
                "User {} not found by email; name and role are not known",
                user_id
            );
            Ok(UserSummary::new(user_id, username_from_email(email)).with_email(email))
        }
        (None, None) => bail!("No user found for {}", email),
    }
}

fn describe(entry: &FeedEntryView) -> String {
    let pin = if entry.is_pinned { "[pinned] " } else { "" };
    match &entry.item {
        FeedItem::Post(post) => format!(
            "{}{} ({}): {} [{} likes, {} comments]",
            pin,
            post.author.name,
            entry.time_label,
            post.content,
            post.like_count,
            post.comment_count
        ),
        FeedItem::Broadcast(broadcast) => format!(
            "{}{} ({}): {}{}",
            pin,
            broadcast.author.name,
            entry.time_label,
            broadcast
                .title
                .as_deref()
                .map(|t| format!("{} - ", t))
                .unwrap_or_default(),
            broadcast.content
        ),
    }
}

async fn print_feed(session: &Session) {
    let entries = session.feed().render(Utc::now()).await;
    println!(
        "=== Feed ({:?}, {} items) ===",
        session.feed().state().await,
        entries.len()
    );
    for entry in &entries {
        println!("{}", describe(entry));
    }
}

/// Log live activity until Ctrl+C
///
/// The subscriptions live in this scope so they are gone before logout.
async fn run(session: &Session) -> Result<()> {
    let bus = session.bus();
    let mut posts = bus.subscribe(EventKind::NewPost);
    let mut messages = bus.subscribe(EventKind::NewMessage);
    let mut announcements = bus.subscribe(EventKind::AnnouncementCreated);

    info!("Running; press Ctrl+C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Received shutdown signal");
                return Ok(());
            }
            Some(RealtimeEvent::NewPost(post)) = posts.recv() => {
                info!("New post from {}: {}", post.author.name, post.content);
            }
            Some(RealtimeEvent::NewMessage(message)) = messages.recv() => {
                let from = message
                    .sender
                    .as_ref()
                    .map(|s| s.name.as_str())
                    .unwrap_or(message.sender_id.as_str());
                info!("Message from {}: {}", from, message.preview());
            }
            Some(RealtimeEvent::AnnouncementCreated(announcement)) = announcements.recv() => {
                info!("Announcement by {}: {}", announcement.author.name, announcement.title);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(Command::DumpConfig { show_sensitive }) = &cli.command {
        println!("{}", diagnostics::dump_config(&config, *show_sensitive)?);
        return Ok(());
    }

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    info!("Starting Klians daemon...");
    config
        .ensure_directories()
        .context("Failed to create directories")?;
    info!("API: {}", config.server.api_base_url);
    if config.realtime.enabled {
        info!("Realtime: {}", config.server.realtime_url);
    } else {
        info!("Realtime: disabled");
    }

    let client_id = config
        .load_or_create_client_id()
        .context("Failed to load client ID")?;
    let viewer = resolve_viewer(&config, &client_id).await?;
    info!("Signed in as {} <{}>", viewer.name, viewer.id);

    let api: Arc<dyn ApiClient> = Arc::new(
        HttpApiClient::new(config.api_config(client_id), Some(viewer.id.clone()))
            .context("Failed to create API client")?,
    );

    let mut session = Session::start(config.session_config(), viewer, api).await;

    let result = match cli.command {
        Some(Command::Feed) => {
            print_feed(&session).await;
            Ok(())
        }
        _ => {
            info!(
                "Feed: {} items, conversations: {}, unread announcements: {}",
                session.feed().items().await.len(),
                session.conversations().conversations().await.len(),
                session.announcements().unread_count().await
            );
            if !session.is_live() && config.realtime.enabled {
                warn!("Realtime channel stopped; no live updates");
            }
            run(&session).await
        }
    };

    session.logout().await;
    info!("Klians daemon stopped");

    result
}
