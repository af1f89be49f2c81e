//! URL construction for the SignalR endpoints.

use url::Url;

use crate::{config::ClientConfig, descriptor::ConnectionDescriptor, error::SignalRResult};

/// Query parameters carrying reconnect continuity.
const CONTINUITY_PARAMS: [&str; 3] = ["messageID", "groupsToken", "groups"];

/// Endpoints below the SignalR path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Connect,
    Start,
    Send,
}

impl Endpoint {
    fn segment(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Start => "start",
            Self::Send => "send",
        }
    }
}

/// How a reconnect restores group membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupContinuity {
    /// Opaque server-issued groups token.
    Token(String),
    /// Raw group names, forwarded JSON-encoded.
    Names(Vec<String>),
    /// Nothing to forward.
    None,
}

/// `{scheme}://{host}/{path}/{segment}`
pub(crate) fn base_url(config: &ClientConfig, segment: &str) -> SignalRResult<Url> {
    let path = config.path.trim_matches('/');
    let raw = if path.is_empty() {
        format!("{}://{}/{segment}", config.scheme(), config.host)
    } else {
        format!("{}://{}/{path}/{segment}", config.scheme(), config.host)
    };
    Ok(Url::parse(&raw)?)
}

/// `connectionData` value announcing the configured hubs.
pub(crate) fn connection_data(hubs: &[String]) -> SignalRResult<String> {
    let data: Vec<serde_json::Value> = hubs
        .iter()
        .map(|hub| serde_json::json!({ "name": hub }))
        .collect();
    Ok(serde_json::to_string(&data)?)
}

/// Build the URL of a session endpoint.
pub(crate) fn endpoint_url(
    config: &ClientConfig,
    descriptor: &ConnectionDescriptor,
    endpoint: Endpoint,
) -> SignalRResult<Url> {
    let mut url = base_url(config, endpoint.segment())?;
    let connection_data = connection_data(&config.hubs)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("transport", "serverSentEvents");
        if let Some((name, value)) = descriptor.identity_param() {
            query.append_pair(name, value);
        }
        query.append_pair("clientProtocol", descriptor.protocol_version());
        if endpoint == Endpoint::Connect {
            let tid: u8 = rand::random_range(0..=10);
            query.append_pair("tid", &tid.to_string());
        }
        query.append_pair("connectionData", &connection_data);
    }
    Ok(url)
}

/// Rewrite a stream URL into its `reconnect` variant carrying the given
/// cursor and group continuity. Earlier continuity parameters are replaced,
/// and a groups token always excludes a group list.
pub(crate) fn continuity_url(
    current: &Url,
    message_id: &str,
    groups: &GroupContinuity,
) -> SignalRResult<Url> {
    let mut url = current.clone();

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|s| s.map(str::to_string).collect())
        .unwrap_or_default();
    match segments.last_mut() {
        Some(last) => *last = "reconnect".to_string(),
        None => segments.push("reconnect".to_string()),
    }
    url.set_path(&format!("/{}", segments.join("/")));

    let kept: Vec<(String, String)> = current
        .query_pairs()
        .filter(|(name, _)| !CONTINUITY_PARAMS.contains(&name.as_ref()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let groups_json = match groups {
        GroupContinuity::Names(names) => Some(serde_json::to_string(names)?),
        _ => None,
    };

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (name, value) in &kept {
            query.append_pair(name, value);
        }
        query.append_pair("messageID", message_id);
        match groups {
            GroupContinuity::Token(token) => {
                query.append_pair("groupsToken", token);
            }
            GroupContinuity::Names(_) => {
                if let Some(json) = &groups_json {
                    query.append_pair("groups", json);
                }
            }
            GroupContinuity::None => {}
        }
    }
    Ok(url)
}
