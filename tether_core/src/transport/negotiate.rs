//! HTTP operations shared by every transport.
//!
//! Negotiation, sending, and the abort notification all ride plain
//! HTTP even for socket transports, so they live here rather than in
//! any one transport crate.

use std::time::Duration;

use crate::{
    connection::PersistentConnection,
    error::TransportError,
    http::{HttpClient, HttpRequest},
    protocol::{NegotiationResponse, ReceivedEnvelope},
};

use super::{urls, TransportKind};

/// Run the negotiate exchange and decode the server's session
/// parameters.
///
/// # Errors
///
/// Fails on network errors, non-success statuses, and undecodable
/// bodies. The connection treats any of these as fatal for the start
/// attempt.
pub async fn negotiate<H: HttpClient>(
    client: &H,
    connection: &PersistentConnection,
) -> Result<NegotiationResponse, TransportError> {
    let url = urls::negotiate(connection);
    tracing::debug!(%url, "negotiating");

    let request = HttpRequest::get(url).headers(connection.headers());
    let response = client.issue(request).await?;
    if !response.is_success() {
        return Err(TransportError::Status(response.status));
    }

    let negotiation: NegotiationResponse = serde_json::from_str(&response.body)?;
    tracing::debug!(
        connection_id = %negotiation.connection_id,
        protocol_version = %negotiation.protocol_version,
        "negotiated"
    );
    Ok(negotiation)
}

/// POST one payload to the send endpoint.
///
/// Returns the decoded response envelope when the server includes one
/// (send acknowledgments carry a result field); the caller feeds it to
/// [`PersistentConnection::process_response`].
///
/// [`PersistentConnection::process_response`]: crate::connection::PersistentConnection::process_response
///
/// # Errors
///
/// Fails on network errors, non-success statuses, and undecodable
/// bodies.
pub async fn send_over_http<H: HttpClient>(
    client: &H,
    connection: &PersistentConnection,
    kind: TransportKind,
    data: String,
) -> Result<Option<ReceivedEnvelope>, TransportError> {
    let url = urls::send(connection, kind);
    let request = HttpRequest::post(url)
        .headers(connection.headers())
        .form("data", data);

    let response = client.issue(request).await?;
    if !response.is_success() {
        return Err(TransportError::Status(response.status));
    }

    Ok(ReceivedEnvelope::decode(&response.body)?)
}

/// Tell the server the client is stopping, bounded by `timeout`.
///
/// Best effort: failures and timeouts are logged and swallowed, since
/// local teardown proceeds regardless.
pub async fn notify_abort<H: HttpClient>(
    client: &H,
    connection: &PersistentConnection,
    kind: TransportKind,
    timeout: Duration,
) {
    let url = urls::abort(connection, kind);
    let request = HttpRequest::post(url)
        .headers(connection.headers())
        .timeout(timeout);

    match client.issue(request).await {
        Ok(response) if response.is_success() => {
            tracing::debug!("server notified of abort");
        }
        Ok(response) => {
            tracing::debug!(status = response.status, "abort notification rejected");
        }
        Err(err) => {
            tracing::debug!(%err, "abort notification failed");
        }
    }
}
