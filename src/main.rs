use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use chat_sync::api::HttpRestApi;
use chat_sync::config::SyncConfig;
use chat_sync::models::{CurrentUser, OutgoingMessage};
use chat_sync::store::{MessageIdentity, TimelineEntry};
use chat_sync::transport::ws::WsTransport;
use chat_sync::transport::{ConnectionManager, ReconnectPolicy, SubscriptionRegistry};
use chat_sync::{ChatService, ServiceEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_sync=debug".into()),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = SyncConfig::from_env()?;
    let token = std::env::var("CHAT_TOKEN").context("CHAT_TOKEN must be set (copy .env.example to .env)")?;
    let user_id = std::env::var("CHAT_USER_ID").context("CHAT_USER_ID must be set")?;
    let user = CurrentUser::new(user_id, std::env::var("CHAT_USER_NAME").ok());

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let connection = ConnectionManager::new(
        Arc::new(WsTransport::new(&config.ws_url)),
        SubscriptionRegistry::new(),
        ReconnectPolicy::from(&config),
    );
    let api = Arc::new(HttpRestApi::new(&config.api_base_url, &token));
    let mut service = ChatService::new(&config, user, connection.clone(), api);

    connection.connect(&token).await?;
    info!("Connected to {}", config.ws_url);
    service.load_conversations();
    service.load_notifications();
    if let Ok(conversation_id) = std::env::var("CHAT_CONVERSATION_ID") {
        service.open_conversation(&conversation_id)?;
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut typing_sweep = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut service, line.trim()) {
                    break;
                }
            }
            event = service.process_next() => {
                let Some(event) = event else { break };
                render(&service, &event);
            }
            _ = typing_sweep.tick() => {
                for conversation_id in service.prune_typing() {
                    render(&service, &ServiceEvent::TypingChanged { conversation_id });
                }
            }
        }
    }

    service.dispose();
    connection.disconnect();
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn handle_line(service: &mut ChatService, line: &str) -> bool {
    let (command, arg) = match line.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };
    let result = match command {
        "" => Ok(()),
        "/quit" => return false,
        "/open" => service.open_conversation(arg),
        "/close" => {
            service.close_conversation();
            Ok(())
        }
        "/new" => service.create_conversation(arg),
        "/older" => {
            if !service.load_older() {
                println!("(no older history)");
            }
            Ok(())
        }
        "/delete" => service.delete_message(arg),
        "/read-all" => {
            service.mark_all_notifications_read();
            Ok(())
        }
        "/list" => {
            print_conversations(service);
            Ok(())
        }
        _ => service.send_message(OutgoingMessage::text(line)).map(|_| ()),
    };
    if let Err(e) = result {
        warn!("{e}");
    }
    true
}

fn render(service: &ChatService, event: &ServiceEvent) {
    match event {
        ServiceEvent::Connected => info!("Live channel up"),
        ServiceEvent::ConnectionLost => warn!("Live channel lost; reconnecting"),
        ServiceEvent::ReconnectFailed => warn!("Gave up reconnecting; sends go over REST"),
        ServiceEvent::ConversationsChanged => print_conversations(service),
        ServiceEvent::ConversationCreated { conversation_id } => {
            println!("Created conversation {conversation_id}")
        }
        ServiceEvent::TimelineChanged { .. } => {
            if let Some(timeline) = service.timeline() {
                println!("── {} ──", timeline.conversation_id());
                for entry in timeline.entries() {
                    println!("{}", format_entry(entry));
                }
            }
        }
        ServiceEvent::MessageFailed { temp_id, reason, .. } => {
            println!("Message {temp_id} was not delivered: {reason}")
        }
        ServiceEvent::TypingChanged { conversation_id } => {
            match service.typing_indicator(conversation_id) {
                Some(typing) => {
                    let who = typing.full_name.as_deref().unwrap_or(&typing.user_id);
                    println!("{who} is typing…");
                }
                None => println!("({conversation_id}: nobody is typing)"),
            }
        }
        ServiceEvent::NotificationsChanged => {
            println!("{} unread notifications", service.notifications().unread_count())
        }
        ServiceEvent::RequestFailed(e) => warn!("{e}"),
        ServiceEvent::Unchanged => {}
    }
}

fn print_conversations(service: &ChatService) {
    for conversation in service.directory().list() {
        let marker = if conversation.has_unread { "*" } else { " " };
        let name = conversation.name.as_deref().unwrap_or(&conversation.id);
        println!("{marker} {name} ({})", conversation.id);
    }
}

fn format_entry(entry: &TimelineEntry) -> String {
    let status = match &entry.identity {
        MessageIdentity::Pending { .. } => " (sending)",
        MessageIdentity::Failed { .. } => " (failed)",
        MessageIdentity::Confirmed { .. } => "",
    };
    let author = entry
        .sender
        .as_ref()
        .and_then(|a| a.full_name.as_deref())
        .unwrap_or(&entry.sender_id);
    let body = if entry.is_deleted {
        "<deleted>"
    } else {
        entry.content.as_deref().or(entry.media_url.as_deref()).unwrap_or("")
    };
    format!("[{}] {author}: {body}{status}", entry.created_at.format("%H:%M"))
}
