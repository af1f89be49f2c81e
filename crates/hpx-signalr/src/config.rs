//! Client configuration.

use std::time::Duration;

use crate::source::backoff::RetrySchedule;

/// Default path of the SignalR endpoint on the server.
pub const DEFAULT_PATH: &str = "signalr";

/// Configuration for a [`SignalRClient`](crate::SignalRClient).
///
/// Builder-style: start from [`ClientConfig::new`] and chain setters.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Host (optionally with `:port`) to connect to.
    pub host: String,
    /// Use `https` rather than `http`.
    pub use_tls: bool,
    /// Path of the SignalR endpoint, without leading or trailing slashes.
    pub path: String,
    /// Protocol version requested during negotiate (None = server default).
    pub client_protocol: Option<String>,
    /// Hubs announced on connect.
    pub hubs: Vec<String>,
    /// Silence after which the keepalive monitor forces a reconnect.
    pub keepalive_timeout: Duration,
    /// Consecutive closes tolerated before the connection is aborted.
    pub max_failed_opens: u32,
    /// Additional HTTP headers sent with every request and stream.
    pub headers: http::HeaderMap,
    /// Connection timeout for HTTP requests and stream opens.
    pub connect_timeout: Duration,
    /// Initial delay before the stream transport retries a dropped stream.
    pub reconnect_initial_delay: Duration,
    /// Maximum delay between stream retries.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for stream retries.
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for stream retries.
    pub reconnect_jitter: f64,
    /// Maximum number of stream retries (None = infinite).
    pub reconnect_max_attempts: Option<u32>,
    /// Capacity of the per-stream event channel.
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            use_tls: true,
            path: DEFAULT_PATH.to_string(),
            client_protocol: None,
            hubs: Vec::new(),
            keepalive_timeout: Duration::from_secs(120),
            max_failed_opens: 10,
            headers: http::HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect_initial_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            reconnect_jitter: 0.1,
            reconnect_max_attempts: None,
            event_channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set whether to use TLS.
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set the endpoint path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_matches('/').to_string();
        self
    }

    /// Set the protocol version requested during negotiate.
    #[must_use]
    pub fn client_protocol(mut self, version: impl Into<String>) -> Self {
        self.client_protocol = Some(version.into());
        self
    }

    /// Set the hubs to connect to.
    #[must_use]
    pub fn hubs<I, S>(mut self, hubs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hubs = hubs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the keepalive timeout.
    #[must_use]
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    /// Set the failed-open threshold.
    #[must_use]
    pub fn max_failed_opens(mut self, max: u32) -> Self {
        self.max_failed_opens = max;
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the initial stream retry delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the maximum stream retry delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the stream retry backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the stream retry jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the maximum number of stream retries.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// URL scheme matching [`use_tls`](Self::use_tls).
    pub fn scheme(&self) -> &'static str {
        if self.use_tls { "https" } else { "http" }
    }

    pub(crate) fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }
        if self.keepalive_timeout.is_zero() {
            return Err("Keepalive timeout must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        self.retry_schedule().check()
    }
}
