//! The negotiate handshake.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::ClientConfig,
    descriptor::ConnectionDescriptor,
    endpoint::base_url,
    error::{SignalRError, SignalRResult},
    transport::HttpTransport,
};

#[derive(Debug, Deserialize)]
struct NegotiateResponse {
    #[serde(rename = "ConnectionId")]
    connection_id: Option<String>,
    #[serde(rename = "ConnectionToken")]
    connection_token: Option<String>,
    #[serde(rename = "ProtocolVersion")]
    protocol_version: Option<String>,
}

/// Build the negotiate URL: `{scheme}://{host}/{path}/negotiate?_={ms}` plus
/// `clientProtocol` when a version hint is configured.
pub fn negotiate_url(config: &ClientConfig) -> SignalRResult<Url> {
    let mut url = base_url(config, "negotiate")?;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("_", &now_ms.to_string());
        if let Some(version) = config.client_protocol.as_deref().filter(|v| !v.is_empty()) {
            query.append_pair("clientProtocol", version);
        }
    }
    Ok(url)
}

/// Parse a negotiate response body.
///
/// # Errors
///
/// Returns [`SignalRError::Negotiation`] if the body is not a JSON object or a
/// field has an unexpected type.
pub fn parse_negotiate_response(body: &str) -> SignalRResult<ConnectionDescriptor> {
    let response: NegotiateResponse = serde_json::from_str(body)
        .map_err(|e| SignalRError::negotiation(format!("invalid negotiate response: {e}")))?;

    Ok(ConnectionDescriptor::new(
        response.connection_id,
        response.connection_token,
        response.protocol_version,
    ))
}

/// Perform the negotiate handshake. Not retried.
///
/// # Errors
///
/// Propagates transport failures, and returns [`SignalRError::Negotiation`]
/// for non-success statuses or unparseable bodies.
pub async fn negotiate(
    transport: &dyn HttpTransport,
    config: &ClientConfig,
) -> SignalRResult<ConnectionDescriptor> {
    let url = negotiate_url(config)?;
    debug!(url = %url, "Negotiating");

    let response = transport.get(&url).await?;
    if !response.status.is_success() {
        return Err(SignalRError::negotiation(format!(
            "negotiate returned HTTP {}",
            response.status
        )));
    }

    let descriptor = parse_negotiate_response(&response.body)?;
    info!(
        connection_id = %descriptor.connection_id(),
        protocol = %descriptor.protocol_version(),
        "Negotiated SignalR connection"
    );
    Ok(descriptor)
}
