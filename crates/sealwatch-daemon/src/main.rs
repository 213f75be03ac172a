//! `sealwatchd` — vault auto-unseal daemon entry point.
//!
//! Parses flags, wires up the configured key store backend and the vault
//! client, runs one-time key initialization, then hands control to the
//! monitor loop until SIGINT/SIGTERM. The one-shot `--clear-keys` mode
//! erases the stored bundle and exits immediately.
//!
//! Exit codes: 0 for expected termination (including one-shot modes),
//! 1 for any startup validation or initialization failure.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use sealwatch_core::config::{BackendKind, KeySource, MonitorConfig};
use sealwatch_core::error::ConfigError;
use sealwatch_core::monitor::Monitor;
use sealwatch_core::runtime::ContainerRuntime;
use sealwatch_core::vault::DockerVaultClient;
use sealwatch_store::{KeyringStore, SecretStore, TpmStore};

/// sealwatchd — keeps a container-hosted vault unsealed.
#[derive(Parser)]
#[command(
    name = "sealwatchd",
    version,
    about = "Vault auto-unseal daemon — polls seal status and re-applies securely stored unseal keys"
)]
struct Cli {
    /// Where to obtain unseal keys during first-run initialization.
    #[arg(long, value_enum, default_value_t = KeySourceArg::InitLog)]
    key_source: KeySourceArg,

    /// Secure key store backend holding the unseal key bundle.
    #[arg(long, value_enum, default_value_t = BackendArg::Keyring)]
    backend: BackendArg,

    /// Seconds between seal status polls (must be positive).
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Name of the container running the target vault.
    #[arg(long, default_value = "vault", env = "SEALWATCH_CONTAINER")]
    container: String,

    /// Container whose log holds the one-time initialization output,
    /// when it differs from the target vault container.
    #[arg(long)]
    init_container: Option<String>,

    /// Observe and log seal state only; never initialize or unseal.
    #[arg(long, default_value_t = false)]
    monitor_only: bool,

    /// Erase the stored unseal key bundle and exit.
    #[arg(long, default_value_t = false, conflicts_with = "monitor_only")]
    clear_keys: bool,

    /// Directory for TPM sealed objects (tpm backend only).
    #[arg(long, default_value = TpmStore::DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Log level filter when RUST_LOG is not set.
    #[arg(long, default_value = "info", env = "SEALWATCH_LOG")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeySourceArg {
    /// Scrape the initialization container's log.
    InitLog,
    /// Prompt the operator with echo suppressed.
    Prompt,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    /// Volatile kernel keyring, cleared on reboot.
    Keyring,
    /// Durable TPM-sealed storage.
    Tpm,
}

impl From<KeySourceArg> for KeySource {
    fn from(arg: KeySourceArg) -> Self {
        match arg {
            KeySourceArg::InitLog => KeySource::InitLog,
            KeySourceArg::Prompt => KeySource::Prompt,
        }
    }
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Keyring => BackendKind::Keyring,
            BackendArg::Tpm => BackendKind::Tpm,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_cli();
    init_logging(&cli.log_level);

    // One-shot mode: erase custody and exit. Needs no container runtime.
    if cli.clear_keys {
        let store = build_store(&cli);
        let removed = store
            .clear()
            .await
            .context("failed to clear stored unseal keys")?;
        info!(removed, "stored unseal keys cleared");
        return Ok(());
    }

    let config = MonitorConfig::new(
        cli.key_source.into(),
        cli.backend.into(),
        cli.interval,
        cli.container.clone(),
        cli.init_container.clone(),
        cli.monitor_only,
    )?;
    preflight(config.backend)?;

    let runtime = ContainerRuntime::new();
    let store = build_store(&cli);
    let vault = Arc::new(DockerVaultClient::new(
        runtime.clone(),
        config.container.clone(),
    ));
    let monitor = Monitor::new(config, vault, store, runtime);

    // Runs exactly once per process lifetime; failure here is fatal since
    // there is nothing to monitor without keys.
    monitor
        .initialize()
        .await
        .context("unseal key initialization failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    monitor.run(shutdown_rx).await;
    info!("sealwatchd stopped");
    Ok(())
}

/// Parse flags, mapping clap's exit conventions onto ours: help/version
/// terminate with 0, any usage error with 1.
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn build_store(cli: &Cli) -> Arc<dyn SecretStore> {
    match cli.backend {
        BackendArg::Keyring => Arc::new(KeyringStore::new()),
        BackendArg::Tpm => Arc::new(TpmStore::new(&cli.state_dir)),
    }
}

/// Verify required external tooling before entering the loop — a missing
/// binary is a fatal startup error, not something to rediscover each poll.
fn preflight(backend: BackendKind) -> Result<(), ConfigError> {
    ensure_tool("docker")?;
    if backend == BackendKind::Tpm {
        for tool in TpmStore::REQUIRED_TOOLS {
            ensure_tool(tool)?;
        }
    }
    Ok(())
}

fn ensure_tool(name: &str) -> Result<(), ConfigError> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| ConfigError::MissingTool {
            name: name.to_owned(),
        })
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
