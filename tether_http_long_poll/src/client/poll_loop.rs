//! The poll loop: connect, then poll until told otherwise.
//!
//! Each iteration issues one held GET and reacts to its outcome:
//!
//! 1. pick the endpoint for the current phase (`connect`, `poll`, or
//!    `reconnect`, the latter carrying the delivery cursor),
//! 2. when entering the reconnect phase, arm the confirmation timer
//!    that presumes success once the request has been out long enough,
//! 3. feed every decoded envelope through the connection, honoring a
//!    server disconnect as terminal,
//! 4. on failure, surface the error, move the connection into its
//!    reconnect grace period, and pause before retrying,
//! 5. stop dead the moment the abort flag is set — checked after every
//!    await.

use std::{sync::Arc, time::Duration};

use tether_core::{
    connection::{ConnectionState, PersistentConnection, TimerPurpose},
    error::TransportError,
    http::{HttpClient, HttpRequest},
    protocol::ReceivedEnvelope,
    transport::{urls, TransportKind},
};

use super::Shared;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timings {
    pub poll_timeout: Duration,
    pub reconnect_delay: Duration,
    pub error_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connect,
    Poll,
    Reconnect,
}

pub(crate) async fn run<H: HttpClient>(
    http: H,
    connection: PersistentConnection,
    shared: Arc<Shared>,
    timings: Timings,
) {
    let mut phase = Phase::Connect;
    tracing::debug!("poll loop started");

    loop {
        if shared.is_aborted() {
            break;
        }

        let kind = TransportKind::LongPolling;
        let url = match phase {
            Phase::Connect => urls::connect(&connection, kind),
            Phase::Poll => urls::poll(&connection, kind),
            Phase::Reconnect => urls::reconnect(&connection, kind),
        };

        if phase == Phase::Reconnect {
            arm_reconnect_confirmation(&connection, timings.reconnect_delay);
        }

        let request = HttpRequest::get(url)
            .headers(connection.headers())
            .timeout(timings.poll_timeout);
        let result = http.issue(request).await;

        if shared.is_aborted() {
            break;
        }

        let failure = match result {
            Ok(response) if response.is_success() => {
                match ReceivedEnvelope::decode(&response.body) {
                    Ok(Some(envelope)) => {
                        if envelope.initialized.is_some() {
                            tracing::debug!("data channel initialized");
                            shared.resolve_start(Ok(()));
                            // Hold until the start sequence finishes its
                            // transition; everything past the init frame
                            // must land on an established connection.
                            while connection.state() == ConnectionState::Connecting
                                && !shared.is_aborted()
                            {
                                tokio::time::sleep(Duration::from_millis(2)).await;
                            }
                            if shared.is_aborted() {
                                break;
                            }
                        }
                        confirm_reconnect_on_traffic(&connection);

                        let outcome = connection.process_response(&envelope);
                        if outcome.disconnected {
                            connection.disconnect();
                            break;
                        }
                        phase = if outcome.should_reconnect {
                            tracing::info!("server requested a reconnect");
                            connection.ensure_reconnecting();
                            Phase::Reconnect
                        } else {
                            Phase::Poll
                        };
                        continue;
                    }
                    Ok(None) => {
                        // Heartbeat frame: liveness only.
                        connection.touch_keep_alive();
                        confirm_reconnect_on_traffic(&connection);
                        if phase == Phase::Reconnect {
                            phase = Phase::Poll;
                        }
                        continue;
                    }
                    Err(err) => TransportError::from(err),
                }
            }
            Ok(response) => TransportError::Status(response.status),
            Err(err) => TransportError::from(err),
        };

        tracing::warn!(%failure, "poll request failed");

        if phase == Phase::Connect {
            // The channel never came up; the connection tears down.
            shared.resolve_start(Err(failure));
            break;
        }

        // A reconnect request that failed outright can no longer be
        // presumed successful.
        connection.timers().cancel(TimerPurpose::ReconnectDelay);

        connection.report_transport_error(failure);
        if !connection.ensure_reconnecting() {
            break;
        }
        phase = Phase::Reconnect;

        let pause = connection
            .timers()
            .delay(TimerPurpose::ErrorDelay, timings.error_delay);
        if pause.await.is_err() {
            // Canceled by teardown.
            break;
        }
    }

    tracing::debug!("poll loop exited");
}

/// A reconnect request that stays out past the delay window is
/// presumed successful. Rearming replaces the previous timer, so at
/// most one confirmation is ever outstanding.
fn arm_reconnect_confirmation(connection: &PersistentConnection, delay: Duration) {
    let conn = connection.clone();
    connection
        .timers()
        .schedule(TimerPurpose::ReconnectDelay, delay, async move {
            if conn.change_state(ConnectionState::Reconnecting, ConnectionState::Connected) {
                conn.did_reconnect();
            }
        });
}

/// Inbound traffic while reconnecting confirms recovery immediately.
fn confirm_reconnect_on_traffic(connection: &PersistentConnection) {
    if connection.state() == ConnectionState::Reconnecting {
        connection.timers().cancel(TimerPurpose::ReconnectDelay);
        if connection.change_state(ConnectionState::Reconnecting, ConnectionState::Connected) {
            connection.did_reconnect();
        }
    }
}
