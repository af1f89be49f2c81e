//! Outbound invocations.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    client::{SignalRClient, WeakClient},
    endpoint::{Endpoint, endpoint_url},
    error::{SignalRError, SignalRResult},
    message::{FieldNames, Invocation},
};

/// A queued [`SignalRClient::send_background`] request.
pub(crate) struct BackgroundJob {
    hub: String,
    method: String,
    args: Vec<Value>,
    state: Option<Map<String, Value>>,
    reply: oneshot::Sender<SignalRResult<String>>,
}

/// Completion handle for a background send.
///
/// Resolves to the server's response body. Dropping it does not cancel the
/// send.
#[derive(Debug)]
#[must_use = "the send runs regardless; await the handle to observe its result"]
pub struct BackgroundSend {
    reply: oneshot::Receiver<SignalRResult<String>>,
}

impl Future for BackgroundSend {
    type Output = SignalRResult<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err(SignalRError::BackgroundSendDropped)))
    }
}

impl SignalRClient {
    /// Invoke `method` on `hub`.
    ///
    /// Holds the message lock for the whole request, so sends are serialized
    /// with each other and with inbound frame processing.
    ///
    /// # Errors
    ///
    /// - [`SignalRError::NotReady`] unless [`can_send`](Self::can_send);
    /// - [`SignalRError::SendFailed`] if the server answers anything but
    ///   200 or 302;
    /// - transport and encoding errors.
    pub async fn send(
        &self,
        hub: &str,
        method: &str,
        args: Vec<Value>,
        state: Option<Map<String, Value>>,
    ) -> SignalRResult<String> {
        if !self.can_send() {
            return Err(SignalRError::NotReady);
        }

        let _guard = self.inner.message_lock.lock().await;
        let descriptor = self.last_connection_info().ok_or(SignalRError::NotReady)?;

        let names = if descriptor.uses_long_field_names() {
            FieldNames::Long
        } else {
            FieldNames::Short
        };
        let invocation = Invocation {
            hub: hub.to_string(),
            method: method.to_string(),
            args,
            state,
            id: self.inner.sequence.next_id(),
        };
        let data = invocation.encode(names)?;
        let url = endpoint_url(&self.inner.config, &descriptor, Endpoint::Send)?;
        debug!(url = %url, data = %data, "Sending invocation");

        let response = self
            .inner
            .http
            .post_form(&url, &[("data", data.as_str())])
            .await?;
        if !response.is_accepted() {
            return Err(SignalRError::SendFailed {
                status: response.status,
            });
        }
        debug!(id = invocation.id, body = %response.body, "Invocation accepted");
        Ok(response.body)
    }

    /// Send the start confirmation.
    ///
    /// Called automatically after `initialized` for protocol versions that
    /// need it.
    ///
    /// # Errors
    ///
    /// [`SignalRError::StartFailed`] if the server answers anything but 200
    /// or 302, plus transport errors.
    pub async fn send_start(&self) -> SignalRResult<String> {
        let descriptor = self.last_connection_info().ok_or(SignalRError::NotReady)?;
        let url = endpoint_url(&self.inner.config, &descriptor, Endpoint::Start)?;
        debug!(url = %url, "Sending start");

        let response = self.inner.http.get(&url).await?;
        if !response.is_accepted() {
            return Err(SignalRError::StartFailed {
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// Queue a send on the client's background worker and return at once.
    ///
    /// Safe to call from handler callbacks. Must be called within a Tokio
    /// runtime.
    pub fn send_background(
        &self,
        hub: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        state: Option<Map<String, Value>>,
    ) -> BackgroundSend {
        let (reply, rx) = oneshot::channel();
        let job = BackgroundJob {
            hub: hub.into(),
            method: method.into(),
            args,
            state,
            reply,
        };

        let worker = self
            .inner
            .background
            .get_or_init(|| spawn_background_worker(self.downgrade()));
        if let Err(mpsc::error::SendError(job)) = worker.send(job) {
            let _ = job.reply.send(Err(SignalRError::BackgroundSendDropped));
        }

        BackgroundSend { reply: rx }
    }
}

fn spawn_background_worker(client: WeakClient) -> mpsc::UnboundedSender<BackgroundJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<BackgroundJob>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let result = match client.upgrade() {
                Some(client) => {
                    client
                        .send(&job.hub, &job.method, job.args, job.state)
                        .await
                }
                None => Err(SignalRError::BackgroundSendDropped),
            };
            let _ = job.reply.send(result);
        }
        debug!("Background send worker stopped");
    });

    tx
}
