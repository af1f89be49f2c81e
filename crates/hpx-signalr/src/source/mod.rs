//! Event stream sources.
//!
//! The supervisor drives a stream through the [`EventSource`] trait and reads
//! what it observes from an `mpsc` channel of [`StreamEvent`]s, one channel per
//! instance. [`SseEventSource`] is the production implementation: a
//! reconnecting Server-Sent-Events reader whose target URL can be rewritten
//! between attempts.
//!
//! ```text
//! EventSourceFactory::create(url, events_tx)
//!   └─ EventSource::start() ──► tokio::spawn(driver)
//!        │                          │
//!        ├── close()  ──► mpsc ──►  │  (SseCommand::Close)
//!        │                          │
//!        └── supervisor pump ◄── mpsc ◄──┘  (StreamEvent items)
//! ```

pub(crate) mod backoff;
mod sse;

use std::fmt;

use tokio::sync::mpsc;
use url::Url;

pub use sse::{SseEventSource, SseEventSourceFactory};

use crate::error::SignalRError;

/// Lifecycle state of an event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Created, not started.
    Raw,
    /// Opening (or re-opening) the stream.
    Connecting,
    /// Receiving events.
    Open,
    /// Dropped; the source will retry on its own.
    Closed,
    /// Closed for good; no further retries.
    Shutdown,
}

impl ReadyState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the source will not reconnect on its own.
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "Raw"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Something an event source observed.
#[derive(Debug)]
pub enum StreamEvent {
    /// The stream opened.
    Open,
    /// A data payload arrived.
    Message(String),
    /// The stream ended; `state` is what the source does next.
    Closed { state: ReadyState },
    /// A comment line arrived.
    Comment(String),
    /// The transport reported a failure.
    Error(SignalRError),
}

/// A reconnecting event stream.
pub trait EventSource: Send + Sync {
    /// Begin connecting. Events flow into the channel handed to the factory.
    fn start(&mut self);

    /// Stop for good. No further events are delivered after this returns.
    fn close(&mut self);

    /// Current lifecycle state.
    fn state(&self) -> ReadyState;

    /// URL the next (re)connection attempt will use.
    fn target_url(&self) -> Url;

    /// Replace the URL used by subsequent attempts.
    fn set_target_url(&self, url: Url);
}

/// Creates [`EventSource`] instances.
pub trait EventSourceFactory: Send + Sync {
    fn create(&self, url: Url, events: mpsc::Sender<StreamEvent>) -> Box<dyn EventSource>;
}
