//! # hpx-signalr
//!
//! SignalR client over the Server-Sent-Events transport.
//!
//! The client negotiates a connection, opens a long-lived event stream to the
//! hub server and keeps it healthy: it confirms the session with `start` where
//! the protocol requires it, tracks the message cursor so a dropped stream
//! resumes where it left off, restarts streams that go silent and gives up
//! after too many failed opens. Hub messages reach the application through a
//! [`SignalRHandler`]; invocations go out over plain HTTP posts.
//!
//! ## Features
//!
//! - **Negotiate and start**: protocol versions 1.0 through 2.x
//! - **Reconnect continuity**: `messageID` and group state carried forward
//! - **Keepalive**: silent streams are restarted on a timer
//! - **Abort accounting**: repeated open failures end the session
//! - **Pluggable IO**: [`HttpTransport`] and [`EventSourceFactory`] seams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hpx_signalr::{ClientConfig, HandlerResult, HubMessage, SignalRClient, SignalRHandler};
//!
//! struct Printer;
//!
//! impl SignalRHandler for Printer {
//!     fn handle(&self, _client: &SignalRClient, message: &HubMessage) -> HandlerResult {
//!         println!("{message}: {:?}", message.args());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("hub.example.com").hubs(["lobby"]);
//!     let client = SignalRClient::new(config, Printer)?;
//!
//!     client.connect().await?;
//!     client.wait_for_ready().await?;
//!     client
//!         .send("lobby", "join", vec![serde_json::json!("alice")], None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod descriptor;
mod dispatch;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod handler;
mod keepalive;
pub mod message;
pub mod negotiate;
pub mod send;
pub mod sequence;
pub mod source;
pub mod transport;

// Re-export commonly used types
pub use client::{ConnectionStatus, SignalRClient, SignalRClientBuilder};
pub use config::ClientConfig;
pub use descriptor::ConnectionDescriptor;
pub use endpoint::GroupContinuity;
pub use error::{BoxError, SignalRError, SignalRResult};
pub use frame::{DataFrame, InboundFrame, MessageBatch};
pub use handler::{Delivery, HandlerResult, SignalRHandler};
pub use message::{FieldNames, HubMessage, Invocation};
pub use send::BackgroundSend;
pub use sequence::SequenceCounter;
pub use source::{
    EventSource, EventSourceFactory, ReadyState, SseEventSource, SseEventSourceFactory,
    StreamEvent,
};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
