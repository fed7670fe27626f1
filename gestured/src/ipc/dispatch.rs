//! IPC message dispatch: parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, info, warn};

use super::server::IpcServer;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{CandidateScoreMap, GestureSession, LandmarkFrame, ScoredFrame};
use crate::sexp::{
    atom_string, escape_string, get_int, get_string, get_value, is_nil, list_items, number,
};

/// Parse an s-expression message and dispatch it.  Returns the response.
pub fn handle_message(server: &mut IpcServer, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_string(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    let is_authenticated = server
        .clients
        .get(&client_id)
        .is_some_and(|c| c.authenticated);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(server, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(server, msg_id, &value),
        Some("session-start") => handle_session_start(server, client_id, msg_id, &value),
        Some("session-stop") => handle_session_stop(server, client_id, msg_id),
        Some("session-context") => handle_session_context(server, client_id, msg_id, &value),
        Some("frame") => handle_frame(server, client_id, msg_id, &value),
        Some("landmark-error") => handle_landmark_error(server, client_id, msg_id, &value),
        Some("pipeline-status") => handle_pipeline_status(server, client_id, msg_id),
        Some("pipeline-config") => handle_pipeline_config(server, client_id, msg_id),
        Some(other) => Some(error_response(
            msg_id,
            &format!("unknown message type: {other}"),
        )),
        None => Some(error_response(msg_id, "missing :type field")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(
    server: &mut IpcServer,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // Only the daemon's own user may drive it.
    if let Some(peer_uid) = server.clients.get(&client_id).and_then(|c| c.peer_uid) {
        let our_uid = unsafe { libc::getuid() };
        if peer_uid != our_uid {
            warn!(client_id, peer_uid, our_uid, "rejecting client: UID mismatch");
            return Some(error_response(msg_id, "authentication failed: UID mismatch"));
        }
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    debug!(client_id, client_name = %client_name, "hello handshake (authenticated)");

    let Some(client) = server.clients.get_mut(&client_id) else {
        return Some(error_response(msg_id, "client not found"));
    };
    client.authenticated = true;
    let pid_field = client
        .peer_pid
        .map(|p| format!(" :peer-pid {}", p))
        .unwrap_or_default();
    let arbiter_flag = if server.arbiter.is_some() { "t" } else { "nil" };
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"gestured\" :server-version \"{}\" :features (:arbiter {}){})",
        msg_id,
        env!("CARGO_PKG_VERSION"),
        arbiter_flag,
        pid_field
    ))
}

fn handle_ping(server: &mut IpcServer, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {} :uptime-ms {})",
        msg_id,
        client_ts,
        server_ts,
        server.started_at.elapsed().as_millis()
    ))
}

fn handle_session_start(
    server: &mut IpcServer,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let config = match get_value(value, "preset").and_then(atom_string) {
        Some(name) => match PipelineConfig::preset(&name) {
            Some(c) => c,
            None => return Some(error_response(msg_id, &format!("unknown preset: {name}"))),
        },
        None => server.base_config.clone(),
    };

    let active = server
        .clients
        .get(&client_id)
        .and_then(|c| c.session.as_ref())
        .is_some_and(|s| s.is_active());
    if active {
        return Some(error_response(msg_id, "session already active"));
    }

    let mut session = match GestureSession::new(config, server.arbiter.clone()) {
        Ok(s) => s,
        Err(e) => return Some(error_response(msg_id, &e.to_string())),
    };
    if let Some(activity) = get_string(value, "activity") {
        session.set_activity(&activity);
    }

    let client = server.clients.get_mut(&client_id)?;
    client.start_session(session);
    info!(client_id, "gesture session started");
    Some(ok_response(msg_id))
}

fn handle_session_stop(server: &mut IpcServer, client_id: u64, msg_id: i64) -> Option<String> {
    let client = server.clients.get_mut(&client_id)?;
    if client.stop_session() {
        info!(client_id, "gesture session stopped");
        Some(ok_response(msg_id))
    } else {
        Some(error_response(msg_id, "no session"))
    }
}

fn handle_session_context(
    server: &mut IpcServer,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let Some(activity) = get_string(value, "activity") else {
        return Some(error_response(msg_id, "missing :activity"));
    };
    let client = server.clients.get_mut(&client_id)?;
    match client.session.as_mut() {
        Some(session) if session.is_active() => {
            session.set_activity(&activity);
            Some(ok_response(msg_id))
        }
        _ => Some(error_response(msg_id, "no active session")),
    }
}

fn handle_frame(
    server: &mut IpcServer,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let frame = match parse_frame(value) {
        Ok(f) => f,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let client = server.clients.get_mut(&client_id)?;
    let Some(session) = client.session.as_mut() else {
        return Some(error_response(msg_id, "no session"));
    };
    match session.process_frame(frame) {
        Ok(events) => {
            let count = events.len();
            client.outbox.extend(events);
            Some(format!(
                "(:type :response :id {} :status :ok :events {})",
                msg_id, count
            ))
        }
        Err(PipelineError::SessionStopped) => Some(error_response(msg_id, "session stopped")),
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_landmark_error(
    server: &mut IpcServer,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let reason = get_string(value, "reason").unwrap_or_else(|| "landmark source failed".to_string());
    let client = server.clients.get_mut(&client_id)?;
    let Some(session) = client.session.as_mut() else {
        return Some(error_response(msg_id, "no session"));
    };
    let events = session.fail(&reason);
    client.outbox.extend(events);
    Some(ok_response(msg_id))
}

fn handle_pipeline_status(server: &mut IpcServer, client_id: u64, msg_id: i64) -> Option<String> {
    let client = server.clients.get(&client_id)?;
    match client.session.as_ref() {
        Some(session) => Some(format!(
            "(:type :response :id {} :status :ok :pipeline {})",
            msg_id,
            session.status_sexp()
        )),
        None => Some(format!(
            "(:type :response :id {} :status :ok :pipeline nil)",
            msg_id
        )),
    }
}

fn handle_pipeline_config(server: &mut IpcServer, client_id: u64, msg_id: i64) -> Option<String> {
    let config = server
        .clients
        .get(&client_id)
        .and_then(|c| c.session.as_ref())
        .map(|s| s.config())
        .unwrap_or(&server.base_config);
    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        config.config_sexp()
    ))
}

// ── Frame wire format ──────────────────────────────────────

/// Parse `(:type :frame :timestamp-ms T :landmarks ((x y z) ...)
/// :candidates (("name" score) ...))`.
///
/// Missing or `nil` landmarks mean no hand.  A point list of the wrong
/// length is also treated as no hand.
pub fn parse_frame(value: &Value) -> Result<ScoredFrame, String> {
    let timestamp_ms = get_value(value, "timestamp-ms")
        .and_then(|v| v.as_u64())
        .ok_or("missing or invalid :timestamp-ms")?;

    let landmarks = match get_value(value, "landmarks") {
        Some(v) if !is_nil(v) => {
            let points = list_items(v)
                .into_iter()
                .map(parse_point)
                .collect::<Result<Vec<_>, _>>()?;
            LandmarkFrame::new(points, timestamp_ms)
        }
        _ => None,
    };

    let mut candidates = CandidateScoreMap::new();
    if let Some(v) = get_value(value, "candidates") {
        for entry in list_items(v) {
            let items = list_items(entry);
            let (name, score) = match items.as_slice() {
                [name, score] => (atom_string(name), number(score)),
                _ => (None, None),
            };
            match (name, score) {
                (Some(name), Some(score)) => candidates.insert(name, score as f32),
                _ => return Err("candidate entries are (\"name\" score)".to_string()),
            }
        }
    }

    Ok(ScoredFrame::new(timestamp_ms, landmarks, candidates))
}

fn parse_point(value: &Value) -> Result<[f32; 3], String> {
    let coords: Vec<f32> = list_items(value)
        .into_iter()
        .map(|v| number(v).map(|n| n as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or("landmark coordinates must be numbers")?;
    match coords.as_slice() {
        [x, y] => Ok([*x, *y, 0.0]),
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err("landmark points are (x y) or (x y z)".to_string()),
    }
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}
