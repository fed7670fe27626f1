//! Socket backend: the daemon's main loop.
//!
//! Drives a calloop event loop holding the IPC listener, one readiness
//! source per client, and timers for status logging and `--exit-after`.
//! Shutdown signals are caught with libc handlers and checked every
//! iteration.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use gestured::ipc::IpcServer;
use gestured::pipeline::Arbiter;
use gestured::PipelineConfig;
use tracing::info;

use super::IpcConfig;

/// Set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Dispatch timeout while a session waits on arbitration.  Worker results
/// arrive over a channel the loop cannot watch.
const PENDING_INTERVAL: Duration = Duration::from_millis(5);

/// Dispatch timeout otherwise, bounding how late a signal is noticed.
const IDLE_INTERVAL: Duration = Duration::from_millis(250);

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Serve gesture sessions until signalled, or for `exit_after` seconds.
pub fn run(
    ipc_config: IpcConfig,
    exit_after: Option<u64>,
    config: PipelineConfig,
    arbiter: Option<Arc<dyn Arbiter>>,
) -> anyhow::Result<()> {
    let mut event_loop = EventLoop::<IpcServer>::try_new()?;
    let handle = event_loop.handle();

    let socket_path = ipc_config
        .socket_path
        .unwrap_or_else(IpcServer::default_socket_path);
    let mut server = IpcServer::new(socket_path, config, arbiter);
    server.ipc_trace = ipc_config.trace;
    server.bind(&handle)?;

    handle
        .insert_source(Timer::from_duration(STATUS_INTERVAL), |_deadline, _, server| {
            info!(
                "Status: {} IPC client(s), {} active session(s)",
                server.clients.len(),
                server.active_sessions()
            );
            TimeoutAction::ToDuration(STATUS_INTERVAL)
        })
        .map_err(|e| anyhow::anyhow!("registering status timer: {}", e.error))?;

    if let Some(secs) = exit_after {
        handle
            .insert_source(
                Timer::from_duration(Duration::from_secs(secs)),
                move |_deadline, _, server| {
                    info!("Exit timer fired after {}s", secs);
                    server.running = false;
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| anyhow::anyhow!("registering exit timer: {}", e.error))?;
    }

    install_signal_handlers();
    info!("Socket backend ready, entering event loop");

    while server.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            break;
        }

        let timeout = if server.has_pending() {
            PENDING_INTERVAL
        } else {
            IDLE_INTERVAL
        };
        match event_loop.dispatch(Some(timeout), &mut server) {
            Ok(()) => {}
            Err(calloop::Error::IoError(e)) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        server.poll_clients();
    }

    info!(
        "Socket backend shutting down ({} IPC client(s))",
        server.clients.len()
    );
    server.shutdown();
    let _ = std::fs::remove_file(&server.socket_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_timer_stops_loop_and_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("gestured.sock");
        let ipc = IpcConfig {
            socket_path: Some(socket_path.clone()),
            trace: false,
        };
        run(ipc, Some(0), PipelineConfig::default(), None).unwrap();
        assert!(!socket_path.exists());
    }
}
