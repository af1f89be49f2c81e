//! Reconnecting SSE event source.
//!
//! Provides [`SseEventSource`], a background driver that opens the target URL
//! as an event stream, forwards data payloads, and retries with exponential
//! backoff when the stream drops. The target URL is re-read before every
//! attempt so the supervisor can carry continuity parameters forward.

use std::{sync::Arc, time::Duration};

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{EventSource, EventSourceFactory, ReadyState, StreamEvent, backoff::RetrySchedule};
use crate::{
    config::ClientConfig,
    error::{SignalRError, SignalRResult},
};

/// Control commands sent from [`SseEventSource`] to its driver.
#[derive(Debug)]
enum SseCommand {
    /// Stop the driver.
    Close,
}

/// Retry and timeout settings shared by every source a factory creates.
#[derive(Clone, Debug)]
struct SseSettings {
    connect_timeout: Duration,
    retry: RetrySchedule,
    max_attempts: Option<u32>,
}

/// State shared between a source and its driver.
#[derive(Debug)]
struct Shared {
    state: RwLock<ReadyState>,
    target: RwLock<Url>,
}

impl Shared {
    fn state(&self) -> ReadyState {
        *self.state.read()
    }

    /// Move to `next` unless the source was already shut down.
    fn transition(&self, next: ReadyState) -> bool {
        let mut state = self.state.write();
        if state.is_shutdown() {
            return false;
        }
        *state = next;
        true
    }
}

/// Builds [`SseEventSource`]s over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct SseEventSourceFactory {
    client: reqwest::Client,
    settings: Arc<SseSettings>,
}

impl SseEventSourceFactory {
    /// Use `client` for every stream. Share it with the
    /// [`ReqwestTransport`](crate::transport::ReqwestTransport) so cookies
    /// set during negotiate reach the stream.
    pub fn new(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            settings: Arc::new(SseSettings {
                connect_timeout: config.connect_timeout,
                retry: config.retry_schedule(),
                max_attempts: config.reconnect_max_attempts,
            }),
        }
    }
}

impl EventSourceFactory for SseEventSourceFactory {
    fn create(&self, url: Url, events: mpsc::Sender<StreamEvent>) -> Box<dyn EventSource> {
        Box::new(SseEventSource {
            client: self.client.clone(),
            settings: Arc::clone(&self.settings),
            shared: Arc::new(Shared {
                state: RwLock::new(ReadyState::Raw),
                target: RwLock::new(url),
            }),
            events: Some(events),
            cmd_tx: None,
        })
    }
}

/// A reconnecting SSE stream.
pub struct SseEventSource {
    client: reqwest::Client,
    settings: Arc<SseSettings>,
    shared: Arc<Shared>,
    events: Option<mpsc::Sender<StreamEvent>>,
    cmd_tx: Option<mpsc::Sender<SseCommand>>,
}

impl EventSource for SseEventSource {
    fn start(&mut self) {
        let Some(events) = self.events.take() else {
            warn!("SSE source already started");
            return;
        };
        if !self.shared.transition(ReadyState::Connecting) {
            return;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        self.cmd_tx = Some(cmd_tx);

        tokio::spawn(sse_source_driver(
            self.client.clone(),
            Arc::clone(&self.settings),
            Arc::clone(&self.shared),
            cmd_rx,
            events,
        ));
    }

    fn close(&mut self) {
        *self.shared.state.write() = ReadyState::Shutdown;
        self.events = None;
        if let Some(cmd_tx) = self.cmd_tx.take() {
            // Dropping the sender also stops the driver if the queue is full.
            let _ = cmd_tx.try_send(SseCommand::Close);
        }
    }

    fn state(&self) -> ReadyState {
        self.shared.state()
    }

    fn target_url(&self) -> Url {
        self.shared.target.read().clone()
    }

    fn set_target_url(&self, url: Url) {
        *self.shared.target.write() = url;
    }
}

impl Drop for SseEventSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Internal: establish a single HTTP connection
// ---------------------------------------------------------------------------

/// Open `url` as an event stream.
///
/// Validates the response status and Content-Type before handing the body to
/// the SSE parser.
async fn establish_sse_connection(
    client: &reqwest::Client,
    settings: &SseSettings,
    url: &Url,
    last_event_id: Option<&str>,
) -> SignalRResult<
    impl Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>>
    + use<>,
> {
    let mut req = client
        .get(url.clone())
        .header(http::header::ACCEPT, "text/event-stream")
        .header(http::header::CACHE_CONTROL, "no-cache");

    // Last-Event-ID for resumption.
    if let Some(id) = last_event_id {
        req = req.header("last-event-id", id);
    }

    let resp = timeout(settings.connect_timeout, req.send())
        .await
        .map_err(|_| SignalRError::timeout(settings.connect_timeout))??;

    let status = resp.status();
    if !status.is_success() {
        return Err(SignalRError::stream_status(status));
    }

    if let Some(ct) = resp.headers().get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or("");
        if !ct_str.contains("text/event-stream") {
            return Err(SignalRError::stream(format!(
                "unexpected content type: {ct_str}"
            )));
        }
    }

    Ok(resp.bytes_stream().eventsource())
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

/// The long-lived task behind an [`SseEventSource`].
///
/// Connects, forwards payloads, and reconnects with backoff until closed or
/// out of attempts. Every attempt that ends, whether it opened or not, is
/// reported as [`StreamEvent::Closed`].
async fn sse_source_driver(
    client: reqwest::Client,
    settings: Arc<SseSettings>,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<SseCommand>,
    events: mpsc::Sender<StreamEvent>,
) {
    let mut attempt: u32 = 0;
    let mut last_event_id: Option<String> = None;

    loop {
        if !shared.transition(ReadyState::Connecting) {
            return;
        }
        let url = shared.target.read().clone();
        info!(url = %url, attempt, "SSE connecting");

        let connection = tokio::select! {
            biased;
            _ = cmd_rx.recv() => {
                info!("SSE source closing (requested)");
                return;
            }
            result = establish_sse_connection(&client, &settings, &url, last_event_id.as_deref()) => result,
        };

        match connection {
            Ok(stream) => {
                let mut stream = Box::pin(stream);
                if !shared.transition(ReadyState::Open) {
                    return;
                }
                info!(url = %url, "SSE stream open");
                attempt = 0;
                if events.send(StreamEvent::Open).await.is_err() {
                    return;
                }

                loop {
                    tokio::select! {
                        biased;
                        _ = cmd_rx.recv() => {
                            info!("SSE source closing (requested)");
                            return;
                        }
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                if !event.id.is_empty() {
                                    last_event_id = Some(event.id.clone());
                                }
                                if event.data.is_empty() {
                                    debug!(event_type = %event.event, "SSE event without data");
                                    continue;
                                }
                                if events.send(StreamEvent::Message(event.data)).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(err)) => {
                                error!(error = %err, "SSE stream error");
                                let err = SignalRError::stream(err.to_string());
                                if events.send(StreamEvent::Error(err)).await.is_err() {
                                    return;
                                }
                                break;
                            }
                            None => {
                                warn!("SSE stream ended");
                                break;
                            }
                        },
                    }
                }
            }
            Err(err) => {
                error!(url = %url, error = %err, "SSE connection failed");
                if events.send(StreamEvent::Error(err)).await.is_err() {
                    return;
                }
            }
        }

        let exhausted = settings
            .max_attempts
            .is_some_and(|max| attempt >= max);
        let next = if exhausted {
            error!(attempts = attempt, "Max SSE reconnect attempts exceeded");
            ReadyState::Shutdown
        } else {
            ReadyState::Closed
        };
        if !shared.transition(next) {
            return;
        }
        if events.send(StreamEvent::Closed { state: next }).await.is_err() || exhausted {
            return;
        }

        let delay = settings.retry.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "SSE reconnecting after backoff"
        );
        tokio::select! {
            biased;
            _ = cmd_rx.recv() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> SseEventSourceFactory {
        SseEventSourceFactory::new(reqwest::Client::new(), &ClientConfig::new("example.com"))
    }

    fn url() -> Url {
        Url::parse("http://example.com/signalr/connect").expect("url")
    }

    #[test]
    fn test_new_source_is_raw() {
        let (tx, _rx) = mpsc::channel(4);
        let source = factory().create(url(), tx);
        assert_eq!(source.state(), ReadyState::Raw);
        assert_eq!(source.target_url(), url());
    }

    #[test]
    fn test_set_target_url() {
        let (tx, _rx) = mpsc::channel(4);
        let source = factory().create(url(), tx);
        let next = Url::parse("http://example.com/signalr/reconnect?messageID=1").expect("url");
        source.set_target_url(next.clone());
        assert_eq!(source.target_url(), next);
    }

    #[test]
    fn test_close_before_start_is_terminal() {
        let (tx, _rx) = mpsc::channel(4);
        let mut source = factory().create(url(), tx);
        source.close();
        assert_eq!(source.state(), ReadyState::Shutdown);
        // Starting a closed source must not revive it.
        source.start();
        assert_eq!(source.state(), ReadyState::Shutdown);
    }
}
