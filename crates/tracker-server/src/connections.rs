//! Open channel connection tracking.
//!
//! Every accepted channel connection holds a [`ConnectionGuard`]. When the
//! last guard drops, waiters on [`ConnectionTracker::idle`] are woken so the
//! supervised services can be stopped once nobody is watching.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use tokio::sync::Notify;

use crate::metrics::{CHANNEL_CONNECTIONS_ACTIVE, CHANNEL_CONNECTIONS_TOTAL};

#[derive(Debug, Default)]
struct Inner {
    open: AtomicUsize,
    idle: Notify,
}

/// Counts open channel connections.
#[derive(Clone, Debug, Default)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    /// Create a tracker with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection on `channel`.
    pub fn register(&self, channel: &'static str) -> ConnectionGuard {
        let _ = self.inner.open.fetch_add(1, Ordering::SeqCst);
        counter!(CHANNEL_CONNECTIONS_TOTAL, "channel" => channel).increment(1);
        gauge!(CHANNEL_CONNECTIONS_ACTIVE).increment(1.0);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Resolves after the open count last dropped from one to zero.
    ///
    /// A transition that happens with no waiter is remembered, so a
    /// subsequent call returns immediately.
    pub async fn idle(&self) {
        self.inner.idle.notified().await;
    }
}

/// Keeps one connection counted until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        gauge!(CHANNEL_CONNECTIONS_ACTIVE).decrement(1.0);
        if self.tracker.inner.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.inner.idle.notify_one();
        }
    }
}
