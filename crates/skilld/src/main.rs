//! skilld - Skill manager daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use skill_core::Config;
use skilld::Daemon;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "skilld", about = "Skill manager daemon", version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file (key=value)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory user skills are installed into
    #[arg(long)]
    skills_dir: Option<PathBuf>,

    /// Directory of bundled core skills
    #[arg(long)]
    core_skills_dir: Option<PathBuf>,

    /// Directory for per-skill log files
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

/// Defaults, then environment, then the config file, then flags.
fn load_config(cli: &Cli) -> eyre::Result<Config> {
    let mut config = Config::default();
    config.apply_env();

    if let Some(path) = &cli.config {
        config
            .load_file(path)
            .wrap_err_with(|| format!("failed to load config {}", path.display()))?;
    }

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = &cli.skills_dir {
        config.skills_dir.clone_from(dir);
    }
    if let Some(dir) = &cli.core_skills_dir {
        config.core_skills_dir.clone_from(dir);
    }
    if let Some(dir) = &cli.logs_dir {
        config.logs_dir.clone_from(dir);
    }
    Ok(config)
}

/// Resolve on the first SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, initiating graceful shutdown");
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Run the async main.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let exit_code = runtime.block_on(async {
        let daemon = match Daemon::new(config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                return 1;
            }
        };

        let token = CancellationToken::new();
        let signals = token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            signals.cancel();
        });

        // Cancelling lets the server drain open requests before `run` returns.
        let exit_code = match daemon.run(token.clone()).await {
            Ok(()) => 0,
            Err(e) => {
                error!("daemon error: {}", e);
                1
            }
        };

        token.cancel();
        daemon.shutdown().await;
        exit_code
    });

    std::process::exit(exit_code);
}
