//! mailsift - content-inspecting SMTP relay entry point

mod extract;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mailsift_common::config::{Config, EngineConfig, LoggingConfig};
use mailsift_core::{build_engine, InspectionRelay, ScanEngine, SmtpDelivery, SmtpListener};
use mailsift_storage::StorageLayout;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, info_span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mailsift", version, about = "Content-inspecting SMTP relay")]
struct Cli {
    /// Configuration file (defaults to ./mailsift.toml, then /etc/mailsift/config.toml)
    #[arg(short, long, env = "MAILSIFT_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept mail, scan attachments and relay it
    Serve(ServeArgs),
    /// Write the attachments of a saved message to disk
    Extract {
        /// Message file, as written to the messages or quarantine directory
        #[arg(long, value_name = "FILE")]
        infile: PathBuf,
        /// Directory to write attachments to
        #[arg(long, default_value = ".", value_name = "DIR")]
        output_path: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Listen address
    #[arg(long)]
    listen_host: Option<String>,
    #[arg(long)]
    listen_port: Option<u16>,

    /// Next-hop relay
    #[arg(long)]
    remote_host: Option<String>,
    #[arg(long)]
    remote_port: Option<u16>,

    /// Base directory for messages, quarantine and attachments
    #[arg(long, value_name = "DIR")]
    storage_path: Option<PathBuf>,

    /// Hold delivery until the scan is clean
    #[arg(long)]
    block: bool,

    /// Never deliver anything
    #[arg(long)]
    always_block: bool,

    /// Save every received message
    #[arg(long)]
    log_all: bool,

    /// Save every extracted attachment
    #[arg(long)]
    save_attachments: bool,

    /// Scanning engine, KIND[:RULE,...]; repeat for several engines
    #[arg(long = "engine", value_name = "SPEC", value_parser = parse_engine)]
    engines: Vec<EngineConfig>,
}

fn parse_engine(spec: &str) -> std::result::Result<EngineConfig, String> {
    EngineConfig::parse_spec(spec).map_err(|e| e.to_string())
}

impl ServeArgs {
    /// Command-line values win over the configuration file
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.listen_host {
            config.smtp.host = host;
        }
        if let Some(port) = self.listen_port {
            config.smtp.port = port;
        }
        if let Some(host) = self.remote_host {
            config.relay.host = host;
        }
        if let Some(port) = self.remote_port {
            config.relay.port = port;
        }
        if let Some(path) = self.storage_path {
            config.storage.path = path;
        }

        config.mode.block |= self.block;
        config.mode.always_block |= self.always_block;
        config.mode.log_all |= self.log_all;
        config.storage.save_attachments |= self.save_attachments;

        if !self.engines.is_empty() {
            config.engines = self.engines;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::locate);
    let mut config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    init_logging(&config.logging);

    match &config_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            serve(config).await
        }
        Commands::Extract {
            infile,
            output_path,
        } => {
            let summary = extract::run(&infile, &output_path).await?;
            info!(
                written = summary.written.len(),
                failed = summary.failed,
                "Extraction finished"
            );
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting mailsift relay...");

    config.validate()?;

    let storage = StorageLayout::create_checked(&config.storage.path)
        .await
        .context("Storage directories are not usable")?;

    let span = info_span!("relay");
    let engines = config
        .engines
        .iter()
        .map(|engine| build_engine(engine, &span))
        .collect::<mailsift_common::Result<Vec<_>>>()
        .context("Failed to build scanning engines")?;

    let delivery = Arc::new(SmtpDelivery::new(&config.relay));
    let relay = Arc::new(
        InspectionRelay::new(config.mode, engines, storage, delivery, span)
            .with_save_attachments(config.storage.save_attachments),
    );

    log_banner(&config, &relay);

    let listener = SmtpListener::new(config.smtp.clone(), config.server.hostname.clone(), relay);
    let runtime = tokio::runtime::Handle::current();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    // mailin-embedded blocks its thread for the lifetime of the listener
    std::thread::Builder::new()
        .name("smtp-listener".to_string())
        .spawn(move || {
            let _ = done_tx.send(listener.serve(runtime));
        })
        .context("Failed to start SMTP listener thread")?;

    tokio::select! {
        result = done_rx => {
            match result {
                Ok(Ok(())) => info!("SMTP listener exited"),
                Ok(Err(e)) => {
                    error!("SMTP listener error: {}", e);
                    return Err(e.into());
                }
                Err(_) => anyhow::bail!("SMTP listener thread terminated unexpectedly"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received");
        }
    }

    info!("mailsift shutdown complete");
    Ok(())
}

fn log_banner(config: &Config, relay: &InspectionRelay) {
    info!("Listening on {}", config.smtp.bind_address());

    if config.mode.always_block {
        info!("Not forwarding: always_block is set");
    } else {
        info!("Forwarding to {}:{}", config.relay.host, config.relay.port);
    }

    info!(
        "Quarantining to {}",
        relay.storage().quarantine.location()
    );

    if config.mode.block {
        info!("Mode: block, delivery waits for a clean scan");
    }
    if config.mode.always_block {
        info!("Mode: always_block, nothing is delivered");
    }
    if config.mode.log_all {
        info!("Mode: log_all, saving every message to {}", relay.storage().messages.location());
    }
    if config.storage.save_attachments {
        info!(
            "Saving attachments to {}",
            relay.storage().attachments.location()
        );
    }

    for engine in relay.engines() {
        info!("Engine: {}", engine.describe());
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_level(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init();
    }
}
