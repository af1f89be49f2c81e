//! Outbound invocation sequence ids.

use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicU64, Ordering},
};

static GLOBAL: LazyLock<SequenceCounter> = LazyLock::new(SequenceCounter::new);

/// Monotonic source of invocation ids.
///
/// Clones share the same counter. [`SequenceCounter::global`] is the
/// process-wide instance every client uses unless another one is injected.
#[derive(Clone, Debug, Default)]
pub struct SequenceCounter {
    next: Arc<AtomicU64>,
}

impl SequenceCounter {
    /// A fresh counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide counter.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Take the next id. Ids are never handed out twice.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`next_id`](Self::next_id) will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
