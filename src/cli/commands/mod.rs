mod subcommands;

#[cfg(test)]
mod tests;

use crate::config::{Config, get_config_path, save_config};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scalazap")]
#[command(about = "WhatsApp Business webhook ingestion and bulk dispatch")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to $SCALAZAP_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one text message
    Send {
        #[arg(long)]
        to: String,
        #[arg(long, short = 'm')]
        message: String,
        /// Connection ID (defaults to the first connected one)
        #[arg(long)]
        connection: Option<String>,
        #[arg(long)]
        company: Option<String>,
    },
    /// Manage messaging connections
    Connections {
        #[command(subcommand)]
        cmd: ConnectionCommands,
    },
    /// Inspect or clear stored messages
    Messages {
        #[command(subcommand)]
        cmd: MessageCommands,
    },
    /// Show recent raw webhook deliveries
    Logs {
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Show configuration and store status
    Status,
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// Add or update a connection
    Add {
        #[arg(long, short = 'n')]
        name: String,
        #[arg(long)]
        phone_number_id: String,
        #[arg(long)]
        access_token: String,
        /// Defaults to a generated UUID
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "connected")]
        status: String,
        #[arg(long)]
        company: Option<String>,
    },
    /// List connections in insertion order
    List,
}

#[derive(Subcommand)]
enum MessageCommands {
    /// List messages, newest first
    List {
        /// Filter by sender number
        #[arg(long)]
        from: Option<String>,
        /// Only messages not yet processed
        #[arg(long)]
        unprocessed: bool,
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Delete every stored message
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => {
            init(config_path.map(PathBuf::from), force)?;
        }
        Commands::Serve { host, port } => {
            subcommands::serve(config_path, host, port).await?;
        }
        Commands::Send {
            to,
            message,
            connection,
            company,
        } => {
            subcommands::send(config_path, to, message, connection, company).await?;
        }
        Commands::Connections { cmd } => {
            subcommands::connections_command(config_path, cmd).await?;
        }
        Commands::Messages { cmd } => {
            subcommands::messages_command(config_path, cmd).await?;
        }
        Commands::Logs { limit } => {
            subcommands::logs_command(config_path, limit).await?;
        }
        Commands::Status => {
            subcommands::status_command(config_path).await?;
        }
    }

    Ok(())
}

fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(p) => p,
        None => get_config_path()?,
    };
    if config_path.exists() && !force {
        println!(
            "\u{26a0}\u{fe0f}  Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    save_config(&Config::default(), Some(config_path.as_path()))?;
    println!("\u{2713} Created config at {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Set whatsapp.verifyToken (or SCALAZAP_WHATSAPP_VERIFY_TOKEN)");
    println!("  2. Add a line: scalazap connections add -n Sales --phone-number-id ... --access-token ...");
    println!("  3. Run: scalazap serve");
    Ok(())
}
