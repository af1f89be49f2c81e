//! Inbound frame dispatch.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    client::SignalRClient,
    endpoint::continuity_url,
    error::SignalRError,
    frame::{DataFrame, InboundFrame, MessageBatch},
    message::HubMessage,
};

impl SignalRClient {
    /// Process one raw data payload from stream `generation` under the
    /// message lock. Frames whose stream was replaced while they waited for
    /// the lock are dropped.
    pub(crate) async fn on_message(&self, generation: u64, raw: &str) {
        let _guard = self.inner.message_lock.lock().await;
        if !self.is_current_stream(generation) {
            debug!(generation, "Dropping frame from superseded stream");
            return;
        }
        self.inner.health.touch();
        debug!(data = %raw, "Frame received");

        match InboundFrame::parse(raw) {
            Ok(InboundFrame::Initialized) => self.on_initialized(generation).await,
            Ok(InboundFrame::Data(frame)) => self.dispatch_frame(frame),
            Err(err) => self.on_error(&err),
        }
    }

    async fn on_initialized(&self, generation: u64) {
        self.inner.health.reset();

        let Some(descriptor) = self.last_connection_info() else {
            warn!("Initialized without a negotiated connection");
            return;
        };

        if descriptor.requires_start()
            && let Err(err) = self.send_start().await
        {
            error!(error = %err, "Start confirmation failed");
            self.on_error(&err);
            *self.inner.start_failure.lock() = Some(err);
            return;
        }

        if !self.is_current_stream(generation) {
            debug!(generation, "Stream replaced during start confirmation");
            return;
        }
        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(
            connection_id = %descriptor.connection_id(),
            "Connection initialized"
        );
    }

    fn dispatch_frame(&self, frame: DataFrame) {
        match frame.messages {
            MessageBatch::Absent => self.inner.handler.keepalive(self),
            MessageBatch::Present(items) => self.deliver(items),
            MessageBatch::Malformed(value) => self.on_error(&SignalRError::frame_decode(format!(
                "message batch is not an array: {value}"
            ))),
        }

        if let Some(message_id) = frame.message_id {
            let updated =
                self.update_target_url(|current| continuity_url(current, &message_id, &frame.groups));
            match updated {
                Ok(Some(url)) => debug!(url = %url, "Reconnect URL updated"),
                Ok(None) => {}
                Err(err) => self.on_error(&err),
            }
        }
    }

    fn deliver(&self, items: Vec<Value>) {
        let delivery = self.inner.handler.delivery();
        let mut batch = Vec::new();

        for item in items {
            let message = match HubMessage::from_value(item) {
                Ok(message) => message,
                Err(err) => {
                    self.on_error(&SignalRError::frame_decode(format!(
                        "invalid hub message: {err}"
                    )));
                    continue;
                }
            };

            if delivery.individual() {
                debug!(message = %message, "Dispatching");
                if let Err(err) = self.inner.handler.handle(self, &message) {
                    self.on_error(&SignalRError::Handler(err));
                }
            }
            if delivery.batch() {
                batch.push(message);
            }
        }

        if delivery.batch()
            && !batch.is_empty()
            && let Err(err) = self.inner.handler.handle_batch(self, &batch)
        {
            self.on_error(&SignalRError::Handler(err));
        }
    }
}
