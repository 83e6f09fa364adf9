//! hearth — authenticated remote control for a small home device fleet.

mod auth;
mod config;
mod devices;
mod gateway;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hearth",
    version,
    about = "Small, fast smart-home control gateway"
)]
struct Cli {
    /// Path to config.toml (defaults to <workspace>/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Bind host (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Account administration.
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Provision an account holding the admin role.
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Admin")]
        first_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearth=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            gateway::run_gateway(&host, port, &config).await
        }
        Command::Admin {
            command:
                AdminCommand::Create {
                    email,
                    password,
                    first_name,
                },
        } => {
            let workspace = config.ensure_workspace()?;
            let store = auth::UserStore::open(&workspace.join("users.db"))?;
            let id = store.create_user(
                &email,
                &password,
                &first_name,
                &[auth::ROLE_ADMIN, auth::ROLE_USER],
            )?;
            println!("✅ Admin account created: {email} (id {id})");
            Ok(())
        }
    }
}
