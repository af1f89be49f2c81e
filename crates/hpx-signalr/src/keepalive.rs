//! Keepalive monitor.
//!
//! A periodic timer that restarts the stream when no frame has arrived within
//! the keepalive window. It is restarted on every open and cancelled on every
//! close, so at most one timer is live per client.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info};

use crate::{
    client::{SignalRClient, WeakClient},
    error::SignalRError,
};

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Owner of the keepalive timer task.
#[derive(Debug, Default)]
pub(crate) struct KeepaliveMonitor {
    slot: Mutex<TimerSlot>,
}

impl KeepaliveMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace any running timer with a fresh one ticking every `timeout`.
    pub(crate) fn start(&self, client: &SignalRClient, timeout: Duration) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        let generation = slot.generation;
        slot.task = Some(tokio::spawn(keepalive_timer(
            client.downgrade(),
            generation,
            timeout,
        )));
        debug!(timeout_ms = timeout.as_millis() as u64, "Keepalive timer started");
    }

    /// Stop the running timer, if any.
    pub(crate) fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        if let Some(task) = slot.task.take() {
            task.abort();
            debug!("Keepalive timer cancelled");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.slot.lock().task.is_some()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }
}

async fn keepalive_timer(client: WeakClient, generation: u64, timeout: Duration) {
    let mut ticker = interval_at(Instant::now() + timeout, timeout);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(client) = client.upgrade() else {
            return;
        };
        // A tick racing a cancel must not act.
        if !client.inner.keepalive.is_current(generation) {
            return;
        }

        let elapsed = client.inner.health.since_last_message();
        if elapsed > timeout {
            let stale = SignalRError::StaleConnection { elapsed };
            info!(reason = %stale, "Restarting event stream");
            // Detached so cancelling this timer never interrupts the restart.
            tokio::spawn(async move { client.reconnect().await });
        }
    }
}
