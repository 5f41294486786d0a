//! Server-assigned connection identity.

/// Identity handed out during negotiation and updated from inbound
/// envelopes.
///
/// Owned exclusively by the connection; transports read it when
/// building requests but never mutate it directly — they hand the
/// connection a parsed response instead. All fields are wiped together
/// on any transition into `Disconnected`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// Server-assigned connection id.
    pub connection_id: Option<String>,
    /// Opaque token carried on every request after negotiation.
    pub connection_token: Option<String>,
    /// Group membership token, updated from envelopes.
    pub groups_token: Option<String>,
    /// Message id cursor, updated from envelopes.
    pub message_id: Option<String>,
}

impl ConnectionIdentity {
    /// Wipe every field.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
