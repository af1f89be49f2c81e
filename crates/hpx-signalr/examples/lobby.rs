//! Lobby Example
//!
//! Connects to a SignalR hub over Server-Sent Events, prints every hub message
//! and answers `ping` with `pong`.
//!
//! Run with: `SIGNALR_HOST=localhost:8080 cargo run -p hpx-signalr --example lobby`

use std::time::Duration;

use hpx_signalr::{
    ClientConfig, HandlerResult, HubMessage, SignalRClient, SignalRError, SignalRHandler,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct Lobby;

impl SignalRHandler for Lobby {
    fn handle(&self, client: &SignalRClient, message: &HubMessage) -> HandlerResult {
        info!(hub = %message.hub(), method = %message.method(), args = ?message.args(), "Hub message");
        if message.method() == "ping" {
            let reply = client.send_background(message.hub(), "pong", message.args().to_vec(), None);
            tokio::spawn(async move {
                if let Err(e) = reply.await {
                    warn!(error = %e, "pong failed");
                }
            });
        }
        Ok(())
    }

    fn connection_closed(&self, _client: &SignalRClient) {
        warn!("Connection closed");
    }

    fn connection_aborted(&self, _client: &SignalRClient) {
        error!("Connection aborted after repeated failures");
    }

    fn error(&self, _client: &SignalRClient, error: &SignalRError) {
        warn!(%error, "SignalR error");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = std::env::var("SIGNALR_HOST").unwrap_or_else(|_| "localhost:8080".to_string());
    let config = ClientConfig::new(host)
        .use_tls(false)
        .hubs(["lobby"])
        .keepalive_timeout(Duration::from_secs(60));

    let client = SignalRClient::new(config, Lobby)?;
    client.connect().await?;
    client
        .wait_for_ready_timeout(Duration::from_secs(15))
        .await?;

    let reply = client
        .send("lobby", "join", vec![serde_json::json!("example")], None)
        .await?;
    info!(%reply, "Joined lobby");

    tokio::signal::ctrl_c().await?;
    client.disconnect();
    Ok(())
}
