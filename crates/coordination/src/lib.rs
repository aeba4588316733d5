/// Collaborative edit coordination and save reconciliation
/// A small consistency protocol layered over an eventually-consistent
/// push/pull transport: activity leases, operation admission, save
/// strategies, conflict detection, and stale-tab resynchronization
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod activity;
pub use activity::*;

mod conflict;
pub use conflict::*;

mod save;
pub use save::*;

mod operations;
pub use operations::*;

mod coordinator;
pub use coordinator::*;

mod resync;
pub use resync::*;

mod realtime;
pub use realtime::*;

mod session;
pub use session::*;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Deadline exceeded; outcome unknown, safe to retry idempotently
    #[error("save timed out: {label} after {deadline_ms}ms")]
    SaveTimeout { label: String, deadline_ms: u64 },

    /// Optimistic version check failed; caller must re-fetch and re-apply
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("document error: {0}")]
    Document(#[from] rundown::RundownError),
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Origin token identifying this running client
///
/// Tags every outbound operation so inbound realtime echoes from this same
/// client can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub uuid::Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

static ORIGIN_TOKEN: std::sync::OnceLock<TabId> = std::sync::OnceLock::new();

/// Stable origin token for the lifetime of the running client
///
/// The first call generates and caches a value; subsequent calls return the
/// cached one. Never rotated.
pub fn origin_token() -> TabId {
    *ORIGIN_TOKEN.get_or_init(TabId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_token_is_stable() {
        let first = origin_token();
        let second = origin_token();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tab_ids_are_unique() {
        assert_ne!(TabId::new(), TabId::new());
    }
}
