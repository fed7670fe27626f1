//! Backends: how frames reach the pipeline.

pub mod replay;
pub mod socket;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use gestured::pipeline::Arbiter;
use gestured::PipelineConfig;

/// Backend type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Serve sessions over the IPC socket.
    Socket,
    /// Run one session over a recorded frame log.
    Replay,
}

/// IPC socket settings.
#[derive(Debug, Clone, Default)]
pub struct IpcConfig {
    pub socket_path: Option<PathBuf>,
    pub trace: bool,
}

/// Everything a backend needs to run.
pub struct RunOptions {
    pub config: PipelineConfig,
    pub arbiter: Option<Arc<dyn Arbiter>>,
    pub ipc: IpcConfig,
    pub replay_file: Option<PathBuf>,
    pub exit_after: Option<u64>,
}

/// Run the daemon with the selected backend.
pub fn run(backend: BackendType, options: RunOptions) -> anyhow::Result<()> {
    match backend {
        BackendType::Socket => socket::run(options.ipc, options.exit_after, options.config, options.arbiter),
        BackendType::Replay => {
            let path = options
                .replay_file
                .context("the replay backend needs --replay FILE")?;
            replay::run(&path, options.config, options.arbiter)
        }
    }
}
