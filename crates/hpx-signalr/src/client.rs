//! Connection supervisor.
//!
//! [`SignalRClient`] owns the negotiated descriptor, the live event source and
//! the health counters, and reacts to what the source reports:
//!
//! ```text
//! connect() ─► negotiate (once) ─► EventSource::start()
//!                                      │
//!   Open ──► keepalive restarted       │ StreamEvent (pump task)
//!   Message ─► dispatch (message lock) │
//!   Closed ──► failure count ──► silent | connection_closed | connection_aborted
//!   Error ───► error hook ──► disconnect on rejected credentials
//! ```
//!
//! Two locks keep the moving parts apart. The message lock serializes frame
//! processing, sends, stream replacement and reads of the reconnect URL. The keepalive lock only
//! guards the timer handle.

use std::{
    fmt,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    descriptor::ConnectionDescriptor,
    endpoint::{Endpoint, endpoint_url},
    error::{SignalRError, SignalRResult},
    handler::SignalRHandler,
    keepalive::KeepaliveMonitor,
    negotiate::negotiate,
    send::BackgroundJob,
    sequence::SequenceCounter,
    source::{
        EventSource, EventSourceFactory, ReadyState, SseEventSourceFactory, StreamEvent,
    },
    transport::{HttpTransport, ReqwestTransport},
};

/// Externally visible connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected.
    Idle,
    /// Opening the stream.
    Connecting,
    /// Stream open.
    Open,
    /// Stream open but silent for longer than the keepalive window.
    Stale,
    /// Stream dropped; the transport is about to retry.
    Closing,
    /// Too many failed opens; needs a new [`SignalRClient::connect`].
    Aborted,
    /// Disconnected or shut down.
    Closed,
}

/// Failure accounting and liveness.
#[derive(Debug)]
pub(crate) struct Health {
    failed_opens: AtomicU32,
    aborted: AtomicBool,
    last_message: Mutex<Instant>,
}

impl Health {
    fn new() -> Self {
        Self {
            failed_opens: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
            last_message: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn reset(&self) {
        self.failed_opens.store(0, Ordering::SeqCst);
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn touch(&self) {
        *self.last_message.lock() = Instant::now();
    }

    pub(crate) fn since_last_message(&self) -> Duration {
        self.last_message.lock().elapsed()
    }
}

struct ActiveStream {
    generation: u64,
    source: Box<dyn EventSource>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) http: Arc<dyn HttpTransport>,
    sources: Arc<dyn EventSourceFactory>,
    pub(crate) handler: Arc<dyn SignalRHandler>,
    pub(crate) sequence: SequenceCounter,
    descriptor: RwLock<Option<Arc<ConnectionDescriptor>>>,
    stream: Mutex<Option<ActiveStream>>,
    stream_generation: AtomicU64,
    pub(crate) message_lock: tokio::sync::Mutex<()>,
    pub(crate) initialized: AtomicBool,
    pub(crate) health: Health,
    pub(crate) keepalive: KeepaliveMonitor,
    ready: watch::Sender<u64>,
    pub(crate) start_failure: Mutex<Option<SignalRError>>,
    pub(crate) background: OnceLock<mpsc::UnboundedSender<BackgroundJob>>,
    ever_connected: AtomicBool,
}

/// A SignalR client over the Server-Sent-Events transport.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SignalRClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Non-owning handle used by background tasks.
#[derive(Clone)]
pub(crate) struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<SignalRClient> {
        self.0.upgrade().map(|inner| SignalRClient { inner })
    }
}

/// Builder for [`SignalRClient`] with replaceable collaborators.
pub struct SignalRClientBuilder {
    config: ClientConfig,
    handler: Arc<dyn SignalRHandler>,
    http: Option<Arc<dyn HttpTransport>>,
    sources: Option<Arc<dyn EventSourceFactory>>,
    sequence: Option<SequenceCounter>,
}

impl SignalRClientBuilder {
    /// Use a custom HTTP transport for negotiate, start and send.
    #[must_use]
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    /// Use a custom event source factory.
    #[must_use]
    pub fn event_sources(mut self, factory: Arc<dyn EventSourceFactory>) -> Self {
        self.sources = Some(factory);
        self
    }

    /// Use a dedicated sequence counter instead of the process-wide one.
    #[must_use]
    pub fn sequence(mut self, counter: SequenceCounter) -> Self {
        self.sequence = Some(counter);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the default HTTP
    /// client cannot be built.
    pub fn build(self) -> SignalRResult<SignalRClient> {
        self.config.validate().map_err(SignalRError::config)?;

        let (http, sources) = match (self.http, self.sources) {
            (Some(http), Some(sources)) => (http, sources),
            (http, sources) => {
                // One reqwest client for both so negotiate cookies reach the stream.
                let transport = ReqwestTransport::new(&self.config)?;
                let sources = sources.unwrap_or_else(|| -> Arc<dyn EventSourceFactory> {
                    Arc::new(SseEventSourceFactory::new(
                        transport.client().clone(),
                        &self.config,
                    ))
                });
                let http = http.unwrap_or_else(|| -> Arc<dyn HttpTransport> { Arc::new(transport) });
                (http, sources)
            }
        };

        let (ready, _) = watch::channel(0);

        Ok(SignalRClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                http,
                sources,
                handler: self.handler,
                sequence: self.sequence.unwrap_or_else(SequenceCounter::global),
                descriptor: RwLock::new(None),
                stream: Mutex::new(None),
                stream_generation: AtomicU64::new(0),
                message_lock: tokio::sync::Mutex::new(()),
                initialized: AtomicBool::new(false),
                health: Health::new(),
                keepalive: KeepaliveMonitor::new(),
                ready,
                start_failure: Mutex::new(None),
                background: OnceLock::new(),
                ever_connected: AtomicBool::new(false),
            }),
        })
    }
}

impl SignalRClient {
    /// Create a client with the default `reqwest` transport and SSE source.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig, handler: impl SignalRHandler) -> SignalRResult<Self> {
        Self::builder(config, handler).build()
    }

    /// Start building a client.
    pub fn builder(config: ClientConfig, handler: impl SignalRHandler) -> SignalRClientBuilder {
        SignalRClientBuilder {
            config,
            handler: Arc::new(handler),
            http: None,
            sources: None,
            sequence: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    /// Descriptor from the last successful negotiate.
    pub fn last_connection_info(&self) -> Option<Arc<ConnectionDescriptor>> {
        self.inner.descriptor.read().clone()
    }

    /// Forget the negotiated descriptor so the next [`connect`](Self::connect)
    /// negotiates again.
    pub fn reset_connection_info(&self) {
        *self.inner.descriptor.write() = None;
    }

    pub fn failed_open_count(&self) -> u32 {
        self.inner.health.failed_opens.load(Ordering::SeqCst)
    }

    pub fn has_aborted(&self) -> bool {
        self.inner.health.aborted.load(Ordering::SeqCst)
    }

    /// Whether the keepalive timer is armed.
    pub fn keepalive_running(&self) -> bool {
        self.inner.keepalive.is_running()
    }

    /// Whether a stream instance exists.
    pub fn is_connected(&self) -> bool {
        self.inner.stream.lock().is_some()
    }

    /// State of the current stream instance, if any.
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.inner.stream.lock().as_ref().map(|s| s.source.state())
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        if self.has_aborted() {
            return ConnectionStatus::Aborted;
        }
        match self.ready_state() {
            None if self.inner.ever_connected.load(Ordering::SeqCst) => ConnectionStatus::Closed,
            None => ConnectionStatus::Idle,
            Some(ReadyState::Raw | ReadyState::Connecting) => ConnectionStatus::Connecting,
            Some(ReadyState::Open) => {
                if self.inner.health.since_last_message() > self.inner.config.keepalive_timeout {
                    ConnectionStatus::Stale
                } else {
                    ConnectionStatus::Open
                }
            }
            Some(ReadyState::Closed) => ConnectionStatus::Closing,
            Some(ReadyState::Shutdown) => ConnectionStatus::Closed,
        }
    }

    /// Whether [`send`](Self::send) may be called: negotiated, stream open and
    /// the server has sent `initialized`.
    pub fn can_send(&self) -> bool {
        self.inner.descriptor.read().is_some()
            && self.inner.initialized.load(Ordering::SeqCst)
            && self.ready_state().is_some_and(ReadyState::is_open)
    }

    /// Negotiate if needed and open the event stream.
    ///
    /// Resets the failure counter and abort flag. Returns once the stream has
    /// been started; use [`wait_for_ready`](Self::wait_for_ready) to wait for
    /// the session to become usable.
    ///
    /// # Errors
    ///
    /// Propagates negotiate failures.
    pub async fn connect(&self) -> SignalRResult<()> {
        let descriptor = match self.last_connection_info() {
            Some(descriptor) => descriptor,
            None => {
                let descriptor =
                    Arc::new(negotiate(self.inner.http.as_ref(), &self.inner.config).await?);
                *self.inner.descriptor.write() = Some(Arc::clone(&descriptor));
                descriptor
            }
        };

        let url = endpoint_url(&self.inner.config, &descriptor, Endpoint::Connect)?;
        info!(
            connection_id = %descriptor.connection_id(),
            url = %url,
            "Connecting"
        );

        let _guard = self.inner.message_lock.lock().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.health.reset();
        self.inner.health.touch();
        self.inner.start_failure.lock().take();
        self.inner.ever_connected.store(true, Ordering::SeqCst);

        self.open_stream(Some(url));
        Ok(())
    }

    /// Wait until the session is usable.
    ///
    /// # Errors
    ///
    /// - [`SignalRError::NotReady`] if the stream closed (or never existed)
    ///   before opening;
    /// - [`SignalRError::RepeatedOpenFailure`] if the connection aborted;
    /// - the start confirmation's error if it failed.
    pub async fn wait_for_ready(&self) -> SignalRResult<()> {
        let mut changes = self.inner.ready.subscribe();
        loop {
            changes.borrow_and_update();
            if let Some(outcome) = self.ready_outcome() {
                return outcome;
            }
            debug!("Waiting for connection to become ready");
            if changes.changed().await.is_err() {
                return Err(SignalRError::NotReady);
            }
        }
    }

    /// [`wait_for_ready`](Self::wait_for_ready) with an upper bound.
    ///
    /// # Errors
    ///
    /// As `wait_for_ready`, plus [`SignalRError::Timeout`].
    pub async fn wait_for_ready_timeout(&self, limit: Duration) -> SignalRResult<()> {
        tokio::time::timeout(limit, self.wait_for_ready())
            .await
            .map_err(|_| SignalRError::timeout(limit))?
    }

    fn ready_outcome(&self) -> Option<SignalRResult<()>> {
        if self.has_aborted() {
            return Some(Err(SignalRError::RepeatedOpenFailure {
                failures: self.failed_open_count(),
            }));
        }
        if let Some(err) = self.inner.start_failure.lock().take() {
            return Some(Err(err));
        }
        let Some(state) = self.ready_state() else {
            return Some(Err(SignalRError::NotReady));
        };
        match state {
            ReadyState::Open if self.inner.initialized.load(Ordering::SeqCst) => Some(Ok(())),
            ReadyState::Raw | ReadyState::Connecting | ReadyState::Open => None,
            ReadyState::Closed | ReadyState::Shutdown => Some(Err(SignalRError::NotReady)),
        }
    }

    /// Restart the stream at the URL it last used, keeping the descriptor and
    /// any reconnect continuity. Does nothing without a stream.
    pub async fn reconnect(&self) {
        let _guard = self.inner.message_lock.lock().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
        if !self.open_stream(None) {
            debug!("Reconnect requested without a stream");
        }
    }

    /// Close the stream. Intentional shutdown: no abort accounting and no
    /// handler notification. Does nothing without a stream.
    pub fn disconnect(&self) {
        let taken = self.inner.stream.lock().take();
        self.inner.keepalive.cancel();
        let Some(mut active) = taken else {
            return;
        };

        info!(generation = active.generation, "Disconnecting");
        active.source.close();
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.notify_ready_waiters();
    }

    /// Replace the current stream instance. With `url` of `None` the new
    /// instance reuses the old one's target URL; returns `false` if there was
    /// no old instance to take it from.
    fn open_stream(&self, url: Option<Url>) -> bool {
        let (generation, events) = {
            let mut slot = self.inner.stream.lock();
            let previous = slot.take();
            let url = match (url, &previous) {
                (Some(url), _) => url,
                (None, Some(previous)) => previous.source.target_url(),
                (None, None) => return false,
            };
            if let Some(mut previous) = previous {
                previous.source.close();
            }

            let generation = self.inner.stream_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = mpsc::channel(self.inner.config.event_channel_capacity);
            info!(url = %url, generation, "Opening event stream");
            let mut source = self.inner.sources.create(url, tx);
            source.start();
            *slot = Some(ActiveStream { generation, source });
            (generation, rx)
        };

        tokio::spawn(pump_events(self.downgrade(), generation, events));
        self.notify_ready_waiters();
        true
    }

    pub(crate) fn is_current_stream(&self, generation: u64) -> bool {
        self.inner
            .stream
            .lock()
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Rewrite the current stream's target URL. Callers hold the message lock.
    pub(crate) fn update_target_url(
        &self,
        rewrite: impl FnOnce(&Url) -> SignalRResult<Url>,
    ) -> SignalRResult<Option<Url>> {
        let slot = self.inner.stream.lock();
        let Some(active) = slot.as_ref() else {
            return Ok(None);
        };
        let url = rewrite(&active.source.target_url())?;
        active.source.set_target_url(url.clone());
        Ok(Some(url))
    }

    /// Target URL of the current stream instance.
    pub fn target_url(&self) -> Option<Url> {
        self.inner.stream.lock().as_ref().map(|s| s.source.target_url())
    }

    pub(crate) fn notify_ready_waiters(&self) {
        self.inner.ready.send_modify(|v| *v = v.wrapping_add(1));
    }

    async fn handle_stream_event(&self, generation: u64, event: StreamEvent) {
        match event {
            StreamEvent::Open => self.on_open(),
            StreamEvent::Message(data) => self.on_message(generation, &data).await,
            StreamEvent::Closed { state } => self.on_closed(state),
            StreamEvent::Comment(comment) => debug!(comment = %comment, "SSE comment"),
            StreamEvent::Error(err) => self.on_error(&err),
        }
        self.notify_ready_waiters();
    }

    fn on_open(&self) {
        debug!("Stream open");
        self.inner
            .keepalive
            .start(self, self.inner.config.keepalive_timeout);
    }

    fn on_closed(&self, state: ReadyState) {
        debug!(state = %state, "Stream closed");
        self.inner.keepalive.cancel();

        let failures = self.inner.health.failed_opens.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.inner.config.max_failed_opens {
            warn!(
                failures,
                "Failed to open stream {} times, aborting", self.inner.config.max_failed_opens
            );
            self.inner.health.aborted.store(true, Ordering::SeqCst);
            let taken = self.inner.stream.lock().take();
            if let Some(mut active) = taken {
                active.source.close();
            }
            self.inner.handler.connection_aborted(self);
        } else if state.is_shutdown() {
            info!("Stream shut down");
            self.inner.handler.connection_closed(self);
        }
    }

    /// Report a contained error. Rejected credentials end the session.
    pub(crate) fn on_error(&self, err: &SignalRError) {
        if err.is_retryable() {
            debug!(error = %err, "Transport error, stream will retry");
        } else {
            warn!(error = %err, "SignalR error");
        }
        self.inner.handler.error(self, err);

        if err.is_auth_rejection() {
            warn!("Credentials rejected, closing connection");
            self.disconnect();
            self.inner.handler.connection_closed(self);
        }
    }
}

impl fmt::Debug for SignalRClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRClient")
            .field("host", &self.inner.config.host)
            .field("status", &self.status())
            .field("failed_opens", &self.failed_open_count())
            .finish()
    }
}

/// Feed one stream instance's events to the client until the instance is
/// superseded or the client is dropped.
async fn pump_events(client: WeakClient, generation: u64, mut events: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            return;
        };
        if !client.is_current_stream(generation) {
            debug!(generation, "Dropping events from superseded stream");
            return;
        }
        client.handle_stream_event(generation, event).await;
    }
}
