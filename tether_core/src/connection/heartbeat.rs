//! Keep-alive heartbeat monitor.
//!
//! A periodic watchdog that compares time-since-last-keep-alive
//! against fractions of the negotiated keep-alive window and
//! classifies the connection as healthy, slow, or lost. Lost routes
//! through [`Transport::lost_connection`], the same path as a
//! transport-detected loss.
//!
//! The monitor holds only a [`Weak`] handle: it never keeps the
//! connection alive, and it exits on its next tick once the connection
//! is gone.
//!
//! [`Transport::lost_connection`]: crate::transport::Transport::lost_connection

use std::{sync::Weak, time::Duration};

use tokio::task::JoinHandle;

use super::{ConnectionState, Inner, PersistentConnection};
use crate::connection::events::ConnectionEvent;

/// Fraction of the keep-alive window after which the connection is
/// reported slow.
pub(crate) const WARN_AFTER_RATIO: f64 = 2.0 / 3.0;

/// The tick interval is the keep-alive window divided by this.
const TICKS_PER_WINDOW: u32 = 6;

/// Shortest tick interval the monitor will use.
const MIN_TICK: Duration = Duration::from_millis(50);

pub(crate) fn spawn(connection: Weak<Inner>, keep_alive_timeout: Duration) -> JoinHandle<()> {
    let warn_after = keep_alive_timeout.mul_f64(WARN_AFTER_RATIO);
    let tick = (keep_alive_timeout / TICKS_PER_WINDOW).max(MIN_TICK);
    tokio::spawn(monitor_loop(connection, warn_after, keep_alive_timeout, tick))
}

async fn monitor_loop(
    connection: Weak<Inner>,
    warn_after: Duration,
    lost_after: Duration,
    tick: Duration,
) {
    tracing::debug!(?lost_after, ?tick, "heartbeat monitor started");
    let mut warned = false;

    loop {
        tokio::time::sleep(tick).await;

        let Some(inner) = connection.upgrade() else {
            break;
        };
        let conn = PersistentConnection::from_inner(inner);

        if conn.state() != ConnectionState::Connected {
            warned = false;
            continue;
        }
        let Some(elapsed) = conn.time_since_keep_alive() else {
            continue;
        };

        if elapsed >= lost_after {
            tracing::warn!(?elapsed, "keep-alive expired, treating connection as lost");
            warned = false;
            if let Some(transport) = conn.active_transport() {
                transport.lost_connection(&conn);
            }
        } else if elapsed >= warn_after {
            // One slow event per episode; rearms once activity resumes.
            if !warned {
                warned = true;
                tracing::info!(?elapsed, "keep-alive is running late");
                conn.emit(&ConnectionEvent::Slow);
            }
        } else {
            warned = false;
        }
    }

    tracing::debug!("heartbeat monitor exited");
}
