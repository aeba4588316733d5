/// Visibility-driven resynchronization
/// A backgrounded client may miss realtime messages entirely, so any
/// hidden period triggers a full resync on return
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{join_all, BoxFuture};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::Result;

/// Callback invoked with the elapsed hidden duration
pub type ResyncCallback = Arc<dyn Fn(Duration) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct Inner {
    hidden_since: Option<Instant>,
    callbacks: HashMap<u64, ResyncCallback>,
    next_id: u64,
}

/// Tracks hidden/visible transitions and fans out resync callbacks
#[derive(Clone, Default)]
pub struct VisibilityResync {
    inner: Arc<Mutex<Inner>>,
}

impl VisibilityResync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resync callback; the returned handle unregisters it on
    /// `unregister()` or drop
    pub fn register<F>(&self, callback: F) -> ResyncHandle
    where
        F: Fn(Duration) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.callbacks.insert(id, Arc::new(callback));
        ResyncHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Record the transition to hidden
    pub fn hidden(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.hidden_since.is_none() {
            inner.hidden_since = Some(Instant::now());
            debug!("client hidden");
        }
    }

    /// Record the transition back to visible and fire every registered
    /// callback exactly once
    ///
    /// Callbacks run concurrently; a failing callback is logged and does not
    /// block or fail its siblings. Returns the number of callbacks invoked.
    pub async fn visible(&self) -> usize {
        let (hidden_for, callbacks) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let since = match inner.hidden_since.take() {
                Some(since) => since,
                // Visible without a recorded hidden period: nothing to do.
                None => return 0,
            };
            let callbacks: Vec<ResyncCallback> = inner.callbacks.values().cloned().collect();
            (since.elapsed(), callbacks)
        };

        debug!(hidden_ms = hidden_for.as_millis() as u64, "client visible, resyncing");

        let invoked = callbacks.len();
        let results = join_all(
            callbacks
                .into_iter()
                .map(|callback| callback(hidden_for)),
        )
        .await;

        for result in results {
            if let Err(error) = result {
                warn!(%error, "resync callback failed");
            }
        }

        invoked
    }
}

/// Scoped registration for a resync callback
pub struct ResyncHandle {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl ResyncHandle {
    pub fn unregister(self) {
        // Drop does the work.
    }
}

impl Drop for ResyncHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.callbacks.remove(&self.id);
        }
    }
}
