//! hostgridd: the HostGrid daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Container runtime (Docker, or in-memory for dry runs)
//! - Deployment orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! hostgridd serve --config /etc/hostgrid/hostgrid.toml --port 8080
//! hostgridd config --config /etc/hostgrid/hostgrid.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hostgrid_core::DaemonConfig;
use hostgrid_core::config::RuntimeKind;
use hostgrid_orchestrator::{Orchestrator, OrchestratorConfig};
use hostgrid_runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime};
use hostgrid_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,hostgridd=debug,hostgrid=debug";

#[derive(Parser)]
#[command(name = "hostgridd", about = "HostGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (orchestrator + REST API).
    Serve {
        /// Path to hostgrid.toml. Flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Tenants are served at `<subdomain>.<base-domain>`.
        #[arg(long)]
        base_domain: Option<String>,

        /// Container engine to drive.
        #[arg(long, value_enum)]
        runtime: Option<RuntimeArg>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RuntimeArg {
    Docker,
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl From<RuntimeArg> for RuntimeKind {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::Docker => RuntimeKind::Docker,
            RuntimeArg::Memory => RuntimeKind::Memory,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(DaemonConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            base_domain,
            runtime,
            log_format,
        } => {
            init_tracing(log_format);

            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            if let Some(base_domain) = base_domain {
                config.routing.base_domain = base_domain;
            }
            if let Some(runtime) = runtime {
                config.runtime.kind = runtime.into();
            }
            run_serve(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("HostGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("creating {}", config.server.data_dir.display()))?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let store = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    let runtime: Arc<dyn ContainerRuntime> = match config.runtime.kind {
        RuntimeKind::Docker => {
            let docker = DockerRuntime::connect()?;
            info!("connected to docker engine");
            Arc::new(docker)
        }
        RuntimeKind::Memory => {
            warn!("using in-memory runtime; no containers will be started");
            Arc::new(MemoryRuntime::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        runtime,
        OrchestratorConfig::from(&config),
    ));
    info!(
        base_domain = %config.routing.base_domain,
        network = %config.routing.network,
        "orchestrator initialized"
    );

    // ── REST API server ────────────────────────────────────────

    let router = hostgrid_api::build_router(orchestrator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("HostGrid daemon stopped");
    Ok(())
}
