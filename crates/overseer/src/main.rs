//! overseer — the VoidNet controller daemon.
//!
//! Single binary that assembles the control plane:
//! - Registry store (redb)
//! - Agent client
//! - Orchestrator (manifest fetch, validation, dispatch)
//! - Control API
//!
//! # Usage
//!
//! ```text
//! overseer serve --config /etc/voidnet/overseer.toml --port 8000
//! overseer validate docker-compose.yml --strict
//! ```

mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::{LogFormat, OverseerConfig};
use voidnet_orchestrator::{GitManifestSource, Orchestrator};
use voidnet_state::{StateStore, Validator};

#[derive(Parser)]
#[command(name = "overseer", about = "VoidNet controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and serve the Control API.
    Serve {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `storage.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Log output format (overrides `log.format`).
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,
    },
    /// Check a compose manifest against the security policy.
    Validate {
        /// Manifest to check.
        file: PathBuf,

        /// Also apply the structural checks.
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_format,
        } => {
            let mut settings = match config {
                Some(path) => OverseerConfig::from_file(&path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => OverseerConfig::default(),
            };
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                settings.storage.data_dir = data_dir;
            }
            if let Some(format) = log_format {
                settings.log.format = format;
            }

            init_tracing(settings.log.format);
            run_serve(settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file, strict } => run_validate(&file, strict),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,overseer=debug,voidnet=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_serve(config: OverseerConfig) -> anyhow::Result<()> {
    info!("VoidNet overseer starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("creating {}", config.storage.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    // Registry store.
    let store = StateStore::open(&db_path)?.with_validator(config.validator());
    info!(path = ?db_path, strict = store.validator().is_strict(), "state store opened");

    // Admin credential, issued once on first start.
    if let Some(secret) = store.ensure_admin_credential(&config.auth.admin_username)? {
        eprintln!();
        eprintln!("  Admin credential created for '{}'.", config.auth.admin_username);
        eprintln!("  API key: {secret}");
        eprintln!("  Store it now; it will not be shown again.");
        eprintln!();
        warn!(
            username = %config.auth.admin_username,
            "admin credential created; the key was printed to stderr"
        );
    }

    // Agent client.
    let agent = config.uplink_client();
    info!(
        default_port = config.agent.port,
        max_response_bytes = agent.max_response_bytes(),
        "agent client initialized"
    );

    // Manifest source.
    let fetch = config.fetch_settings();
    info!(checkout_root = ?fetch.checkout_root, "manifest source initialized");
    let source = GitManifestSource::new(fetch);

    // Orchestrator.
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(agent),
        Arc::new(source),
        config.dispatch_settings(),
    );
    info!(settings = ?orchestrator.settings(), "orchestrator initialized");

    // ── Start API server ───────────────────────────────────────

    let router = voidnet_api::build_router(voidnet_api::ApiState::new(orchestrator.clone()));
    let ip = config
        .server
        .bind
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c; shutting down");
            }
            info!("shutdown signal received");
        })
        .await?;

    // Let running deploys and stops record their outcome.
    orchestrator.drain(config.drain_timeout()).await;

    info!("VoidNet overseer stopped");
    Ok(())
}

fn run_validate(file: &Path, strict: bool) -> anyhow::Result<ExitCode> {
    let manifest = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let validator = if strict {
        Validator::strict()
    } else {
        Validator::new()
    };

    let verdict = validator.validate(&manifest);
    if verdict.accepted() {
        println!("{}: ok", file.display());
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}: rejected", file.display());
    for violation in verdict.into_violations() {
        println!("  - {violation}");
    }
    Ok(ExitCode::FAILURE)
}
