//! Socket.IO v5 / Engine.IO v4 text framing for the websocket transport.
//!
//! Only the subset the engine uses is supported: handshake, heartbeat,
//! default-namespace connect/disconnect and plain (non-binary) events.
//! Packets addressed to any other namespace decode as [`Packet::Noop`].

use serde_json::Value;

use freqdash_core::SyncError;

/// A decoded text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake (`0{...}`).
    Open(Value),
    /// Engine.IO close (`1`).
    Close,
    Ping,
    Pong,
    /// Namespace connect ack (`40`), with optional handshake data.
    Connect(Option<Value>),
    /// Server-side namespace disconnect (`41`).
    Disconnect,
    /// Application event (`42["name", ...args]`).
    Event { name: String, payload: Value },
    ConnectError(String),
    Noop,
}

/// Heartbeat parameters announced in the open packet, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
        }
    }
}

impl Heartbeat {
    pub fn from_handshake(handshake: &Value) -> Self {
        let defaults = Self::default();
        Self {
            ping_interval_ms: handshake["pingInterval"].as_u64().unwrap_or(defaults.ping_interval_ms),
            ping_timeout_ms: handshake["pingTimeout"].as_u64().unwrap_or(defaults.ping_timeout_ms),
        }
    }

    /// Longest the link may stay silent before it is considered dead.
    pub fn liveness(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval_ms + self.ping_timeout_ms)
    }
}

pub fn decode(frame: &str) -> Result<Packet, SyncError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or_else(|| SyncError::Protocol("empty frame".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(parse_json(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '6' => Ok(Packet::Noop),
        other => Err(SyncError::Protocol(format!("unknown engine packet type '{other}'"))),
    }
}

fn decode_message(body: &str) -> Result<Packet, SyncError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| SyncError::Protocol("empty socket packet".into()))?;
    let (namespace, data) = split_namespace(chars.as_str());
    if namespace != "/" {
        return Ok(Packet::Noop);
    }
    let data = skip_ack_id(data);

    match kind {
        '0' => {
            if data.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(parse_json(data)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(data),
        '4' => {
            let value = if data.is_empty() { Value::Null } else { parse_json(data)? };
            let message = match &value {
                Value::String(s) => s.clone(),
                other => other["message"].as_str().unwrap_or("connection refused").to_string(),
            };
            Ok(Packet::ConnectError(message))
        }
        other => Err(SyncError::Protocol(format!("unsupported socket packet type '{other}'"))),
    }
}

fn decode_event(data: &str) -> Result<Packet, SyncError> {
    let Value::Array(mut items) = parse_json(data)? else {
        return Err(SyncError::Protocol("event payload is not an array".into()));
    };
    if items.is_empty() {
        return Err(SyncError::Protocol("event without a name".into()));
    }
    let Value::String(name) = items.remove(0) else {
        return Err(SyncError::Protocol("event name is not a string".into()));
    };

    let payload = match items.len() {
        0 => Value::Null,
        1 => items.remove(0),
        _ => Value::Array(items),
    };
    Ok(Packet::Event { name, payload })
}

/// Split off a `/namespace,` prefix. No prefix means the default namespace.
fn split_namespace(data: &str) -> (&str, &str) {
    if !data.starts_with('/') {
        return ("/", data);
    }
    match data.find(',') {
        Some(idx) => (&data[..idx], &data[idx + 1..]),
        None => (data, ""),
    }
}

fn skip_ack_id(data: &str) -> &str {
    data.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json(data: &str) -> Result<Value, SyncError> {
    serde_json::from_str(data).map_err(|e| SyncError::Protocol(format!("invalid packet json: {e}")))
}

pub fn encode_connect() -> String {
    "40".to_string()
}

pub fn encode_pong() -> String {
    "3".to_string()
}

pub fn encode_disconnect() -> String {
    "41".to_string()
}

pub fn encode_event(name: &str, payload: &Value) -> String {
    let args = if payload.is_null() {
        Value::Array(vec![Value::String(name.to_string())])
    } else {
        Value::Array(vec![Value::String(name.to_string()), payload.clone()])
    };
    format!("42{args}")
}

/// Build the websocket endpoint for a push URL.
///
/// `http(s)` schemes map to `ws(s)`. A URL that already names the
/// `/socket.io` path is used as given.
pub fn socket_io_url(url: &str) -> String {
    let url = url.trim();
    let url = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    };

    if url.contains("/socket.io") {
        return url;
    }
    format!("{}/socket.io/?EIO=4&transport=websocket", url.trim_end_matches('/'))
}
