//! acp - Command-line client for ACP devices
//!
//! Reads and writes device properties over the ACP remote management protocol.

mod commands;
mod config;

use acp_client::Client;
use acp_protocol::{registry, Registry};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acp")]
#[command(about = "Command-line client for ACP remote management")]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, env = "ACP_CONFIG")]
    config: Option<PathBuf>,

    /// Device host name or address
    #[arg(long)]
    host: Option<String>,

    /// Device port
    #[arg(short, long)]
    port: Option<u16>,

    /// Device password
    #[arg(long)]
    password: Option<String>,

    /// Local source address to bind before connecting
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read one or more properties
    Get {
        /// Property names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Write a property
    Set {
        /// Property name
        name: String,

        /// New value (decimal, 0x hex, MAC, text or hex data depending on type)
        value: String,
    },

    /// List known properties
    Props,

    /// Print the header key derived from a password
    Key {
        /// Password (defaults to the configured one)
        password: Option<String>,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(password) = &self.password {
            config.auth.password = password.clone();
        }
        if let Some(bind) = self.bind {
            config.connection.bind_addr = Some(bind);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    if let Some(path) = &config.properties.table_file {
        tracing::debug!("Loading property table from {}", path.display());
        registry::install(Registry::from_file(path)?)?;
    }

    // Commands that need no device connection
    if let Some(output) = commands::execute_local(&cli.command, &config, cli.json)? {
        println!("{}", output);
        return Ok(());
    }

    let mut client = Client::new(config.session_config(), config.auth.password.as_bytes());
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = commands::execute(&mut client, cli.command, cli.json).await;
    client.disconnect().await?;

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
