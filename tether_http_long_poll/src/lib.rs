//! # Tether HTTP Long Polling
//!
//! The reference transport for the Tether persistent-connection
//! client: repeated held HTTP GETs against the `connect`, `poll`, and
//! `reconnect` endpoints, with sends and the abort notification going
//! over plain POSTs.
//!
//! Long polling detects liveness through its own request cadence, so
//! it opts out of the shared heartbeat monitor.

mod client;

pub use client::LongPollingTransport;

/// How long one poll request is held open before the client gives up
/// on it (240 seconds; servers answer well inside this).
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 240;

/// How long a reconnect request may stay unanswered before the
/// reconnect is presumed to have succeeded anyway (5 seconds).
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Pause between a failed request and the next attempt (2 seconds).
pub const DEFAULT_ERROR_DELAY_SECS: u64 = 2;
