//! Application callbacks.

use crate::{
    client::SignalRClient,
    error::{BoxError, SignalRError},
    message::HubMessage,
};

/// Result returned by message callbacks. Errors are reported through
/// [`SignalRHandler::error`] and never interrupt the rest of a batch.
pub type HandlerResult = Result<(), BoxError>;

/// How a handler wants hub messages delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Delivery {
    /// One [`handle`](SignalRHandler::handle) call per message.
    #[default]
    Individual,
    /// One [`handle_batch`](SignalRHandler::handle_batch) call per frame.
    Batch,
    /// Both of the above, individual calls first.
    Both,
}

impl Delivery {
    pub fn individual(self) -> bool {
        matches!(self, Self::Individual | Self::Both)
    }

    pub fn batch(self) -> bool {
        matches!(self, Self::Batch | Self::Both)
    }
}

/// Receives hub messages and connection lifecycle notifications.
///
/// Callbacks run on the client's event task while the message lock is held,
/// so they must not wait on [`SignalRClient::send`]. Use
/// [`SignalRClient::send_background`] or spawn a task instead.
pub trait SignalRHandler: Send + Sync + 'static {
    /// Handle a single hub message.
    fn handle(&self, client: &SignalRClient, message: &HubMessage) -> HandlerResult;

    /// Delivery mode for this handler.
    fn delivery(&self) -> Delivery {
        Delivery::Individual
    }

    /// Handle every message of one frame at once.
    fn handle_batch(&self, _client: &SignalRClient, _messages: &[HubMessage]) -> HandlerResult {
        Ok(())
    }

    /// A frame without a message batch arrived.
    fn keepalive(&self, _client: &SignalRClient) {}

    /// The connection was shut down and will not come back on its own.
    fn connection_closed(&self, _client: &SignalRClient) {}

    /// The stream failed to open too many times; call
    /// [`SignalRClient::connect`] to try again.
    fn connection_aborted(&self, _client: &SignalRClient) {}

    /// An error was contained while processing the connection.
    fn error(&self, _client: &SignalRClient, _error: &SignalRError) {}
}
