/// Per-field activity leases
/// A field counts as "being edited" from the first keystroke until the quiet
/// period elapses after the last one, with no gap under rapid input
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rundown::ItemId;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Quiet period after the last keystroke before a lease expires
pub const QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Composite key identifying a single editable cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub item_id: ItemId,
    pub field: String,
}

impl FieldKey {
    pub fn new(item_id: ItemId, field: impl Into<String>) -> Self {
        Self {
            item_id,
            field: field.into(),
        }
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.item_id, self.field)
    }
}

struct Lease {
    expires_at: Instant,
    sweep: JoinHandle<()>,
}

/// Tracks which fields are actively being typed into
///
/// Leases are refreshed on every keystroke (debounce-by-refresh, not
/// throttle). Expiry is checked lazily on query, so correctness never
/// depends on the sweep task having run.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    leases: Arc<Mutex<HashMap<FieldKey, Lease>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh the lease for a field
    ///
    /// Cancels any previously scheduled expiry sweep for the key and
    /// schedules a new one at now + quiet period.
    pub fn mark_active(&self, key: FieldKey) {
        let expires_at = Instant::now() + QUIET_PERIOD;

        let leases = Arc::clone(&self.leases);
        let sweep_key = key.clone();
        let sweep = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            let mut leases = leases.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(lease) = leases.get(&sweep_key) {
                if lease.expires_at <= Instant::now() {
                    debug!(field = %sweep_key, "activity lease expired");
                    leases.remove(&sweep_key);
                }
            }
        });

        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = leases.insert(key, Lease { expires_at, sweep }) {
            previous.sweep.abort();
        }
    }

    /// True iff an unexpired lease exists for the field
    pub fn is_active(&self, key: &FieldKey) -> bool {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases
            .get(key)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Snapshot of all currently leased fields
    pub fn active_fields(&self) -> Vec<FieldKey> {
        let now = Instant::now();
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases
            .iter()
            .filter(|(_, lease)| lease.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FieldKey {
        FieldKey::new(ItemId::new(), "script")
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_after_quiet_period() {
        let tracker = ActivityTracker::new();
        let key = key();

        tracker.mark_active(key.clone());
        assert!(tracker.is_active(&key));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!tracker.is_active(&key));
        assert!(tracker.active_fields().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_lease_continuous() {
        let tracker = ActivityTracker::new();
        let key = key();

        // Keystrokes every 800ms; the lease must never lapse in between.
        tracker.mark_active(key.clone());
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(800)).await;
            assert!(tracker.is_active(&key));
            tracker.mark_active(key.clone());
        }

        // 1000ms after the last keystroke it expires.
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(tracker.is_active(&key));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!tracker.is_active(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_fields() {
        let tracker = ActivityTracker::new();
        let first = key();
        let second = FieldKey::new(first.item_id, "talent");

        tracker.mark_active(first.clone());
        tokio::time::advance(Duration::from_millis(600)).await;
        tracker.mark_active(second.clone());
        tokio::time::advance(Duration::from_millis(600)).await;

        assert!(!tracker.is_active(&first));
        assert!(tracker.is_active(&second));
        assert_eq!(tracker.active_fields(), vec![second]);
    }
}
