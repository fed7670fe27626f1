//! IPC server: Unix socket listener, per-client state and message framing.
//!
//! Messages are s-expressions behind a 4-byte big-endian length prefix.
//! Each client owns at most one gesture session; events from that session
//! are written only to that client.
//!
//! The listener and every client stream are registered with calloop, so the
//! daemon sleeps in `dispatch` until something is readable.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::config::PipelineConfig;
use crate::pipeline::{Arbiter, GestureSession, PipelineEvent};

/// Maximum message payload size (1 MiB).
const MAX_MESSAGE_SIZE: u32 = 1_048_576;

/// Maximum write buffer before dropping events (256 KiB).
const MAX_WRITE_BUFFER: usize = 262_144;

/// Default rate limit: messages per second per client.  Frames arrive at
/// camera rate, so this leaves headroom above 60 fps plus control traffic.
const DEFAULT_RATE_LIMIT: u32 = 240;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// Per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Returns true if the message is within the rate limit.
    fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start).as_secs() >= RATE_LIMIT_WINDOW_SECS {
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Read peer credentials via SO_PEERCRED (Linux only).
fn get_peer_cred(stream: &UnixStream) -> Option<(Option<u32>, Option<i32>)> {
    #[cfg(target_os = "linux")]
    {
        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == 0 {
            Some((Some(cred.uid), Some(cred.pid)))
        } else {
            None
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream;
        Some((None, None))
    }
}

/// Per-client connection state.
pub struct IpcClient {
    pub stream: UnixStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub authenticated: bool,
    pub id: u64,
    pub peer_uid: Option<u32>,
    pub peer_pid: Option<i32>,
    pub rate_limiter: RateLimiter,
    /// The client's gesture session, if started.
    pub session: Option<GestureSession>,
    /// Events produced while handling the current message; written after
    /// its response.
    pub outbox: Vec<PipelineEvent>,
    /// Set when the client broke the protocol and must be dropped.
    pub protocol_error: bool,
    /// Readiness source waking the event loop for this stream.
    source: Option<RegistrationToken>,
}

impl IpcClient {
    fn new(stream: UnixStream, id: u64) -> Self {
        stream.set_nonblocking(true).ok();

        let (peer_uid, peer_pid) = get_peer_cred(&stream).unwrap_or_else(|| {
            warn!(id, "failed to read peer credentials");
            (None, None)
        });
        if let Some(uid) = peer_uid {
            debug!(id, peer_uid = uid, peer_pid = ?peer_pid, "peer credentials");
        }

        Self {
            stream,
            read_buf: Vec::with_capacity(4096),
            write_buf: Vec::new(),
            authenticated: false,
            id,
            peer_uid,
            peer_pid,
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
            session: None,
            outbox: Vec::new(),
            protocol_error: false,
            source: None,
        }
    }

    /// Attempt to flush pending writes.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Enqueue a framed message (length prefix + payload).
    pub fn enqueue_message(&mut self, payload: &str) {
        let bytes = payload.as_bytes();
        self.write_buf
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.write_buf.extend_from_slice(bytes);
    }

    /// Enqueue an event, dropping it if the client is not keeping up.
    pub fn enqueue_event(&mut self, payload: &str) {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "write buffer overflow, dropping event");
            return;
        }
        self.enqueue_message(payload);
    }

    /// Extract complete framed messages from the read buffer.
    pub fn extract_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while self.read_buf.len() >= 4 {
            let len = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]);
            if len > MAX_MESSAGE_SIZE {
                error!(client_id = self.id, len, "message exceeds maximum size");
                self.read_buf.clear();
                self.protocol_error = true;
                break;
            }
            let total = 4 + len as usize;
            if self.read_buf.len() < total {
                break;
            }
            let payload = String::from_utf8_lossy(&self.read_buf[4..total]).to_string();
            self.read_buf.drain(..total);
            messages.push(payload);
        }
        messages
    }

    /// Replace the session, stopping the previous one.
    pub fn start_session(&mut self, session: GestureSession) {
        self.end_session();
        self.session = Some(session);
    }

    /// Stop and drop the session.  Returns false when there was none.
    pub fn stop_session(&mut self) -> bool {
        let had = self.session.is_some();
        self.end_session();
        had
    }

    /// Stop the session, if any.  Its pending work is discarded.
    fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.outbox.clear();
    }
}

/// Listener socket, connected clients, and what new sessions start with.
pub struct IpcServer {
    pub socket_path: PathBuf,
    /// Set by `bind`; client streams are registered through it.
    loop_handle: Option<LoopHandle<'static, IpcServer>>,
    listener_source: Option<RegistrationToken>,
    pub clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
    pub ipc_trace: bool,
    /// Configuration for sessions started without a preset.
    pub base_config: PipelineConfig,
    /// Arbiter shared by all sessions.
    pub arbiter: Option<Arc<dyn Arbiter>>,
    pub started_at: Instant,
    /// Cleared to leave the event loop.
    pub running: bool,
}

impl IpcServer {
    /// Create the server.  Call `bind` before polling.
    pub fn new(
        socket_path: PathBuf,
        base_config: PipelineConfig,
        arbiter: Option<Arc<dyn Arbiter>>,
    ) -> Self {
        Self {
            socket_path,
            loop_handle: None,
            listener_source: None,
            clients: HashMap::new(),
            next_client_id: 1,
            ipc_trace: false,
            base_config,
            arbiter,
            started_at: Instant::now(),
            running: true,
        }
    }

    /// `$XDG_RUNTIME_DIR/gestured.sock`, or a per-user path under /tmp.
    pub fn default_socket_path() -> PathBuf {
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) => PathBuf::from(dir).join("gestured.sock"),
            Err(_) => PathBuf::from(format!("/tmp/gestured-{}.sock", unsafe { libc::getuid() })),
        }
    }

    /// Bind the listener socket (owner-only permissions) and register it
    /// with calloop.
    pub fn bind(&mut self, loop_handle: &LoopHandle<'static, IpcServer>) -> anyhow::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(socket_path = ?self.socket_path, "IPC server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        let token = loop_handle
            .insert_source(source, |_event, listener, server| {
                loop {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            let client_id = server.add_client(stream);
                            info!(client_id, "IPC client connected");
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            error!("accept error: {}", e);
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow::anyhow!("registering IPC listener: {}", e.error))?;
        self.listener_source = Some(token);
        self.loop_handle = Some(loop_handle.clone());
        Ok(())
    }

    /// Register a connected stream.
    pub fn add_client(&mut self, stream: UnixStream) -> u64 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        let mut client = IpcClient::new(stream, client_id);
        client.source = self.watch_client(&client);
        self.clients.insert(client_id, client);
        client_id
    }

    /// Wake the event loop when the client's stream turns readable.  The
    /// callback does no I/O: `poll_clients` drains the stream right after
    /// `dispatch` returns, which clears the level.
    fn watch_client(&self, client: &IpcClient) -> Option<RegistrationToken> {
        let handle = self.loop_handle.as_ref()?;
        let stream = match client.stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(client_id = client.id, "cannot watch client stream: {}", e);
                return None;
            }
        };
        let source = Generic::new(stream, Interest::READ, Mode::Level);
        match handle.insert_source(source, |_event, _stream, _server| Ok(PostAction::Continue)) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(client_id = client.id, "cannot watch client stream: {}", e.error);
                None
            }
        }
    }

    /// Whether any session is waiting on arbitration.  The event loop must
    /// keep waking while one is, since worker results do not wake it.
    pub fn has_pending(&self) -> bool {
        self.clients
            .values()
            .any(|c| c.session.as_ref().is_some_and(|s| s.is_pending()))
    }

    /// Number of clients with a live session.
    pub fn active_sessions(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.session.as_ref().is_some_and(|s| s.is_active()))
            .count()
    }

    /// Read, dispatch, poll sessions and flush, once per loop iteration.
    pub fn poll_clients(&mut self) {
        let client_ids: Vec<u64> = self.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let mut buf = [0u8; 4096];
            let read_result = match self.clients.get_mut(&client_id) {
                Some(client) => loop {
                    match client.stream.read(&mut buf) {
                        Ok(0) => break Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                        Ok(n) => client.read_buf.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                        Err(e) => break Err(e),
                    }
                },
                None => continue,
            };

            // Whatever arrived before EOF is still handled.
            let messages = self
                .clients
                .get_mut(&client_id)
                .map(|c| c.extract_messages())
                .unwrap_or_default();
            for msg in messages {
                self.handle_client_message(client_id, &msg);
            }

            self.poll_session(client_id);

            let protocol_error = self
                .clients
                .get(&client_id)
                .is_some_and(|c| c.protocol_error);
            if let Err(e) = read_result {
                debug!(client_id, "client disconnected: {}", e);
                disconnected.push(client_id);
                continue;
            }
            if protocol_error {
                disconnected.push(client_id);
                continue;
            }

            if let Some(client) = self.clients.get_mut(&client_id) {
                if let Err(e) = client.flush_writes() {
                    debug!(client_id, "write error: {}", e);
                    disconnected.push(client_id);
                }
            }
        }

        for id in disconnected {
            self.remove_client(id);
        }
    }

    /// Dispatch one message and queue its response followed by any events.
    pub fn handle_client_message(&mut self, client_id: u64, msg: &str) {
        let rate_ok = self
            .clients
            .get_mut(&client_id)
            .is_some_and(|c| c.rate_limiter.check());
        if !rate_ok {
            warn!(client_id, "rate limit exceeded, dropping message");
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.enqueue_message(
                    "(:type :response :id 0 :status :error :reason \"rate limit exceeded\")",
                );
            }
            return;
        }

        if self.ipc_trace {
            info!(client_id, "<< {}", msg);
        }
        let response = dispatch::handle_message(self, client_id, msg);
        if let Some(ref resp) = response {
            if self.ipc_trace {
                info!(client_id, ">> {}", resp);
            }
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.enqueue_message(resp);
            }
        }
        self.flush_outbox(client_id);
    }

    /// Collect arbitration decisions that arrived since the last frame.
    fn poll_session(&mut self, client_id: u64) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        if let Some(session) = client.session.as_mut() {
            if session.is_pending() {
                let events = session.poll();
                client.outbox.extend(events);
            }
        }
        self.flush_outbox(client_id);
    }

    /// Write queued events to the owning client.
    fn flush_outbox(&mut self, client_id: u64) {
        let trace = self.ipc_trace;
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        for event in std::mem::take(&mut client.outbox) {
            let sexp = event.to_sexp();
            if trace {
                info!(client_id, "event >> {}", sexp);
            }
            client.enqueue_event(&sexp);
        }
    }

    /// Drop a client, stopping its session.
    pub fn remove_client(&mut self, client_id: u64) {
        if let Some(mut client) = self.clients.remove(&client_id) {
            client.end_session();
            if let (Some(handle), Some(token)) = (self.loop_handle.as_ref(), client.source.take()) {
                handle.remove(token);
            }
            info!(client_id, "removing disconnected IPC client");
        }
    }

    /// Stop every session and forget every client.
    pub fn shutdown(&mut self) {
        let ids: Vec<u64> = self.clients.keys().copied().collect();
        for id in ids {
            self.remove_client(id);
        }
        if let (Some(handle), Some(token)) = (self.loop_handle.as_ref(), self.listener_source.take()) {
            handle.remove(token);
        }
        self.loop_handle = None;
    }
}
