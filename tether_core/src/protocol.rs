//! Wire-level data model: negotiation result, inbound envelope, and
//! keep-alive bookkeeping.
//!
//! The envelope uses the protocol's short field names (`C`, `M`, `G`,
//! `T`, `D`, `R`, `S`); the negotiation response uses PascalCase. Both
//! are decoded with `serde_json`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Immutable result of the negotiate exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiationResponse {
    /// Protocol version the server speaks. Must equal the client's own
    /// version or the connection fails fast.
    pub protocol_version: String,

    /// Server-assigned connection id.
    pub connection_id: String,

    /// Opaque token identifying this connection on later requests.
    pub connection_token: String,

    /// Relative endpoint path, when the server reports one.
    #[serde(default)]
    pub url: Option<String>,

    /// Seconds a reconnecting connection may stay alive before the
    /// server considers it gone.
    pub disconnect_timeout: f64,

    /// Seconds the transport is given to establish its data channel.
    #[serde(default)]
    pub transport_connect_timeout: Option<f64>,

    /// Keep-alive window in seconds. Absent when the server does not
    /// send keep-alives; no heartbeat monitoring is armed in that case.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,

    /// Whether the server believes WebSockets will work.
    #[serde(default)]
    pub try_web_sockets: bool,
}

impl NegotiationResponse {
    /// Disconnect timeout as a [`Duration`].
    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.disconnect_timeout.max(0.0))
    }

    /// Transport connect timeout as a [`Duration`], when present.
    #[must_use]
    pub fn transport_connect_timeout(&self) -> Option<Duration> {
        self.transport_connect_timeout
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Keep-alive timeout as a [`Duration`], when present.
    #[must_use]
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// The decoded shape of every inbound frame, regardless of transport.
///
/// Fields are optional because different phases populate different
/// subsets: the handshake ack carries `S`, steady-state pushes carry
/// `C`/`M`, send acknowledgments carry `R`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivedEnvelope {
    /// Message id cursor (`C`). Last-write-wins when present.
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Application payloads (`M`), in server-sent order.
    #[serde(rename = "M", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<serde_json::Value>,

    /// Groups token (`G`). Last-write-wins when present.
    #[serde(rename = "G", default, skip_serializing_if = "Option::is_none")]
    pub groups_token: Option<String>,

    /// Reconnect flag (`T`): the server asks for a full reconnect.
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<i64>,

    /// Disconnect flag (`D`): terminal for this frame and the connection.
    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none")]
    pub disconnect: Option<i64>,

    /// Result of a client-initiated operation (`R`).
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Initialization flag (`S`): first frame of a fresh data channel.
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub initialized: Option<i64>,
}

impl ReceivedEnvelope {
    /// Decode a raw body into an envelope.
    ///
    /// Returns `Ok(None)` — not an error — when the body is empty or a
    /// heartbeat-only frame (`{}`).
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error for malformed bodies.
    pub fn decode(body: &str) -> Result<Option<Self>, serde_json::Error> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let envelope: Self = serde_json::from_str(trimmed)?;
        if envelope.is_heartbeat() {
            return Ok(None);
        }
        Ok(Some(envelope))
    }

    /// Whether the server asked for a full reconnect.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        matches!(self.reconnect, Some(flag) if flag != 0)
    }

    /// Whether the server requested a disconnect.
    #[must_use]
    pub fn disconnected(&self) -> bool {
        matches!(self.disconnect, Some(flag) if flag != 0)
    }

    /// Whether every field is absent (a bare keep-alive frame).
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        *self == Self::default()
    }
}

/// Liveness bookkeeping for a connection whose transport supports
/// keep-alive.
///
/// `last_keep_alive` is refreshed on every successfully processed
/// server response, not only heartbeat frames; it is a liveness proxy,
/// not a strict protocol heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveData {
    /// Negotiated keep-alive window.
    pub timeout: Duration,
    /// When inbound activity was last observed.
    pub last_keep_alive: Instant,
}

impl KeepAliveData {
    /// Create keep-alive data with the clock starting now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_keep_alive: Instant::now(),
        }
    }

    /// Record inbound activity.
    pub fn touch(&mut self) {
        self.last_keep_alive = Instant::now();
    }

    /// Time since inbound activity was last observed.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.last_keep_alive.elapsed()
    }
}
