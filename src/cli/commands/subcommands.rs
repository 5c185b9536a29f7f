use super::{ConnectionCommands, MessageCommands};
use crate::config::{Config, get_config_path, load_config};
use crate::config::credentials::credential_summary;
use crate::dispatch::Dispatcher;
use crate::gateway::{AppState, start};
use crate::models::{
    Connection, ConnectionStatus, ConnectionType, MessageRecord, OutboundSendRequest,
};
use crate::resolver::ConnectionSelector;
use crate::store::fields::{FieldValue, MessageField};
use crate::store::{MessageFilter, MessageStore, SqliteStore};
use crate::utils::{normalize_phone, truncate_for_log};
use crate::whatsapp::GraphApiClient;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let path = config.store.resolved_path()?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

pub(super) async fn serve(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    config.validate()?;

    let store = open_store(&config)?;
    let api = Arc::new(GraphApiClient::new(&config.whatsapp));
    let state = AppState::new(&config, store, api);
    let (handle, addr) = start(&config.gateway.host, config.gateway.port, state).await?;
    println!("\u{2713} scalazap {} listening on http://{}", crate::VERSION, addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    handle.abort();
    Ok(())
}

pub(super) async fn send(
    config_path: Option<&Path>,
    to: String,
    message: String,
    connection: Option<String>,
    company: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let selector = ConnectionSelector {
        connection_id: connection,
        company_id: company,
        ..ConnectionSelector::default()
    };
    let credentials = selector.resolve(store.as_ref()).await?;

    let api = Arc::new(GraphApiClient::new(&config.whatsapp));
    let dispatcher = Dispatcher::new(api, store, config.dispatch.clone());
    let sent = dispatcher
        .send_one(&credentials, &OutboundSendRequest::text(to, message))
        .await?;
    println!("\u{2713} Sent to {} ({})", sent.recipient, sent.message_id);
    if !sent.recorded {
        println!("\u{26a0}\u{fe0f}  Message was sent but could not be recorded");
    }
    Ok(())
}

/// Connection built from `connections add` arguments.
pub(super) fn new_connection(
    name: String,
    phone_number_id: String,
    access_token: String,
    id: Option<String>,
    status: &str,
    company: Option<String>,
) -> Connection {
    Connection {
        id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name,
        phone_number_id,
        access_token,
        status: ConnectionStatus::parse(status),
        connection_type: ConnectionType::OfficialApi,
        company_id: company,
        created_at: chrono::Utc::now(),
    }
}

pub(super) async fn connections_command(
    config_path: Option<&Path>,
    cmd: ConnectionCommands,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    match cmd {
        ConnectionCommands::Add {
            name,
            phone_number_id,
            access_token,
            id,
            status,
            company,
        } => {
            let connection =
                new_connection(name, phone_number_id, access_token, id, &status, company);
            store.upsert_connection(&connection).await?;
            println!(
                "\u{2713} Saved connection {} ({})",
                connection.id, connection.name
            );
        }
        ConnectionCommands::List => {
            let connections = store.list_connections().await?;
            if connections.is_empty() {
                println!("No connections.");
                return Ok(());
            }
            for c in &connections {
                println!(
                    "{}  {}  {}  {}  {}",
                    c.id,
                    c.name,
                    c.phone_number_id,
                    c.status.as_str(),
                    c.company_id.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

/// Filter for `messages list`.
pub(super) fn list_filter(from: Option<&str>, unprocessed: bool, limit: usize) -> MessageFilter {
    let mut filter = MessageFilter {
        limit: limit.clamp(1, crate::store::MAX_LIST_LIMIT),
        ..MessageFilter::default()
    };
    if let Some(from) = from {
        filter = filter.with(
            MessageField::FromNumber,
            FieldValue::Text(normalize_phone(from)),
        );
    }
    if unprocessed {
        filter = filter.with(MessageField::Processed, FieldValue::Bool(false));
    }
    filter
}

pub(super) fn format_message_line(m: &MessageRecord) -> String {
    let direction = if m.is_from_me { "\u{2192}" } else { "\u{2190}" };
    let peer = if m.is_from_me {
        &m.to_number
    } else {
        &m.from_number
    };
    format!(
        "{} {} {} [{}] {}",
        m.timestamp.format("%Y-%m-%d %H:%M:%S"),
        direction,
        peer,
        m.message_type.as_str(),
        truncate_for_log(&m.body, 60)
    )
}

pub(super) async fn messages_command(config_path: Option<&Path>, cmd: MessageCommands) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    match cmd {
        MessageCommands::List {
            from,
            unprocessed,
            limit,
        } => {
            let filter = list_filter(from.as_deref(), unprocessed, limit);
            let messages = store.list_messages(&filter).await?;
            if messages.is_empty() {
                println!("No messages.");
            }
            for m in &messages {
                println!("{}", format_message_line(m));
            }
        }
        MessageCommands::Clear { yes } => {
            if !yes {
                println!("Delete all stored messages? (y/N): ");
                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;
                if !input.trim().eq_ignore_ascii_case("y") {
                    return Ok(());
                }
            }
            let removed = store.clear_messages().await?;
            println!("\u{2713} Deleted {} messages", removed);
        }
    }
    Ok(())
}

pub(super) async fn logs_command(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let logs = store.recent_webhook_logs(limit.max(1)).await?;
    if logs.is_empty() {
        println!("No webhook deliveries logged.");
    }
    for log in &logs {
        println!(
            "#{} {} {} {} {}",
            log.id,
            log.received_at.format("%Y-%m-%d %H:%M:%S"),
            log.source.as_str(),
            log.method,
            truncate_for_log(&log.body, 120)
        );
    }
    Ok(())
}

pub(super) async fn status_command(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };

    println!("scalazap {} status\n", crate::VERSION);
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "\u{2713}" } else { "\u{2717}" }
    );
    println!(
        "Gateway: {}:{} (ack timeout {}ms)",
        config.gateway.host, config.gateway.port, config.gateway.ack_timeout_ms
    );
    println!(
        "Graph API: {}/{}",
        config.whatsapp.graph_api_base, config.whatsapp.api_version
    );
    for (name, set) in credential_summary(&config) {
        println!("{}: {}", name, if set { "\u{2713}" } else { "not set" });
    }

    let store = open_store(&config)?;
    let connections = store.list_connections().await?;
    let connected = connections
        .iter()
        .filter(|c| c.status == ConnectionStatus::Connected)
        .count();
    println!(
        "Store: {} ({} connections, {} connected)",
        config.store.resolved_path()?.display(),
        connections.len(),
        connected
    );
    Ok(())
}
