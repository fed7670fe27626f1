//! gestured: debounced gesture decision daemon.
//!
//! Serves gesture sessions over a Unix socket, or replays a recorded frame
//! log through one session.

mod backend;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use gestured::pipeline::{Arbiter, CommandArbiter};
use gestured::PipelineConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gestured", about = "Debounced gesture decision daemon")]
struct Cli {
    /// Backend to use: socket, replay, or auto
    #[arg(long, default_value = "auto")]
    backend: String,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/gestured.sock)
    #[arg(long)]
    socket: Option<String>,

    /// Frame log to replay ("-" for stdin)
    #[arg(long)]
    replay: Option<String>,

    /// Pipeline config file (s-expression plist)
    #[arg(long)]
    config: Option<String>,

    /// Config preset when no file is given: foreground or background
    #[arg(long)]
    preset: Option<String>,

    /// Command run to arbitrate ambiguous frames
    #[arg(long)]
    arbiter: Option<String>,

    /// Override the arbitration timeout in milliseconds
    #[arg(long)]
    arbitration_timeout_ms: Option<u64>,

    /// Log all IPC messages
    #[arg(long)]
    ipc_trace: bool,

    /// Exit after N seconds (socket backend testing)
    #[arg(long)]
    exit_after: Option<u64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gestured {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gestured=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("gestured v{} starting", env!("CARGO_PKG_VERSION"));

    let backend_type = match cli.backend.as_str() {
        "socket" => backend::BackendType::Socket,
        "replay" => backend::BackendType::Replay,
        "auto" => {
            if cli.replay.is_some() {
                backend::BackendType::Replay
            } else {
                backend::BackendType::Socket
            }
        }
        other => bail!("unknown backend: {other}. Use: socket, replay, or auto"),
    };
    info!("backend: {:?}", backend_type);

    let mut config = match (&cli.config, &cli.preset) {
        (Some(path), _) => PipelineConfig::load(&PathBuf::from(path))?,
        (None, Some(name)) => match PipelineConfig::preset(name) {
            Some(c) => c,
            None => bail!("unknown preset: {name}. Use: foreground or background"),
        },
        (None, None) => PipelineConfig::default(),
    };
    if let Some(ms) = cli.arbitration_timeout_ms {
        config.arbitration_timeout_ms = ms;
    }
    config.validate()?;

    let arbiter: Option<Arc<dyn Arbiter>> = match cli.arbiter.as_deref() {
        Some(line) => match CommandArbiter::from_command_line(line) {
            Some(a) => {
                info!("arbiter: {}", line);
                Some(Arc::new(a))
            }
            None => bail!("--arbiter needs a command"),
        },
        None => None,
    };

    backend::run(
        backend_type,
        backend::RunOptions {
            config,
            arbiter,
            ipc: backend::IpcConfig {
                socket_path: cli.socket.map(PathBuf::from),
                trace: cli.ipc_trace,
            },
            replay_file: cli.replay.map(PathBuf::from),
            exit_after: cli.exit_after,
        },
    )
}
