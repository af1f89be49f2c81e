//! Negotiated connection identity.

/// Protocol version assumed when the server does not report one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0";

/// Versions that predate the `start` confirmation request.
const PRE_START_VERSIONS: [&str; 4] = ["1.0", "1.1", "1.2", "1.3"];

/// Versions whose invocations use long field names.
const LONG_FIELD_VERSIONS: [&str; 2] = ["1.0", "1.1"];

/// Identity of a negotiated SignalR session.
///
/// Produced by [`negotiate`](crate::negotiate::negotiate) and never mutated;
/// a fresh negotiate replaces it wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    connection_id: String,
    connection_token: String,
    protocol_version: String,
}

impl ConnectionDescriptor {
    /// Build a descriptor. Missing values become empty strings and an empty
    /// protocol version resolves to [`DEFAULT_PROTOCOL_VERSION`].
    pub fn new(
        connection_id: Option<String>,
        connection_token: Option<String>,
        protocol_version: Option<String>,
    ) -> Self {
        let protocol_version = protocol_version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());

        Self {
            connection_id: connection_id.unwrap_or_default(),
            connection_token: connection_token.unwrap_or_default(),
            protocol_version,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn connection_token(&self) -> &str {
        &self.connection_token
    }

    /// Negotiated protocol version, never empty.
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Whether the server expects a `start` request after `initialized`.
    pub fn requires_start(&self) -> bool {
        !PRE_START_VERSIONS.contains(&self.protocol_version.as_str())
    }

    /// Whether outbound invocations use the long field-name scheme.
    pub fn uses_long_field_names(&self) -> bool {
        LONG_FIELD_VERSIONS.contains(&self.protocol_version.as_str())
    }

    /// Query parameter identifying this session: the token when present,
    /// otherwise the id.
    pub(crate) fn identity_param(&self) -> Option<(&'static str, &str)> {
        if !self.connection_token.is_empty() {
            Some(("connectionToken", &self.connection_token))
        } else if !self.connection_id.is_empty() {
            Some(("connectionId", &self.connection_id))
        } else {
            None
        }
    }
}
