//! Request URL construction.
//!
//! Every endpoint hangs off the connection's base URL (trailing slash
//! ensured at configuration time) and carries the client protocol
//! version, the transport name where one applies, the connection
//! token once negotiated, the connection-data descriptor, and any
//! user-supplied query pairs. Reconnect-style requests additionally
//! carry the message id cursor and the groups token so the server can
//! resume delivery without a gap.

use url::Url;

use crate::{connection::PersistentConnection, CLIENT_PROTOCOL_VERSION};

use super::TransportKind;

/// URL for the negotiate exchange.
#[must_use]
pub fn negotiate(connection: &PersistentConnection) -> Url {
    let mut url = endpoint(connection, "negotiate");
    append_common(&mut url, connection, None, false);
    url
}

/// URL for a transport's initial connect request.
#[must_use]
pub fn connect(connection: &PersistentConnection, kind: TransportKind) -> Url {
    let mut url = endpoint(connection, "connect");
    append_common(&mut url, connection, Some(kind), true);
    url
}

/// URL for a reconnect request; carries the delivery cursor.
#[must_use]
pub fn reconnect(connection: &PersistentConnection, kind: TransportKind) -> Url {
    let mut url = endpoint(connection, "reconnect");
    append_common(&mut url, connection, Some(kind), true);
    append_cursor(&mut url, connection);
    url
}

/// URL for a steady-state poll; carries the delivery cursor.
#[must_use]
pub fn poll(connection: &PersistentConnection, kind: TransportKind) -> Url {
    let mut url = endpoint(connection, "poll");
    append_common(&mut url, connection, Some(kind), true);
    append_cursor(&mut url, connection);
    url
}

/// URL for sending one payload.
#[must_use]
pub fn send(connection: &PersistentConnection, kind: TransportKind) -> Url {
    let mut url = endpoint(connection, "send");
    append_common(&mut url, connection, Some(kind), true);
    url
}

/// URL for notifying the server of a client-side stop.
#[must_use]
pub fn abort(connection: &PersistentConnection, kind: TransportKind) -> Url {
    let mut url = endpoint(connection, "abort");
    append_common(&mut url, connection, Some(kind), true);
    url
}

fn endpoint(connection: &PersistentConnection, name: &str) -> Url {
    let mut url = connection.url().clone();
    let mut path = url.path().to_owned();
    path.push_str(name);
    url.set_path(&path);
    url
}

fn append_common(
    url: &mut Url,
    connection: &PersistentConnection,
    kind: Option<TransportKind>,
    with_token: bool,
) {
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("clientProtocol", CLIENT_PROTOCOL_VERSION);
    if let Some(kind) = kind {
        pairs.append_pair("transport", kind.wire_name());
    }
    if with_token {
        if let Some(token) = connection.connection_token() {
            pairs.append_pair("connectionToken", &token);
        }
    }
    if let Some(data) = connection.connection_data() {
        pairs.append_pair("connectionData", data);
    }
    for (name, value) in connection.query_string() {
        pairs.append_pair(name, value);
    }
}

fn append_cursor(url: &mut Url, connection: &PersistentConnection) {
    let mut pairs = url.query_pairs_mut();
    if let Some(id) = connection.message_id() {
        pairs.append_pair("messageId", &id);
    }
    if let Some(groups) = connection.groups_token() {
        pairs.append_pair("groupsToken", &groups);
    }
}
