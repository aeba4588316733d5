/// Save strategies and the timeout envelope
/// Per-cell saves are unconditional keyed upserts; delta saves are
/// version-guarded partial-document writes, one at a time
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::warn;

use rundown::{Column, Item, ItemId, Rundown, RundownId};

use crate::{CoordinationError, Result};

/// Default deadline for any asynchronous save call
pub const DEFAULT_SAVE_DEADLINE: Duration = Duration::from_millis(20_000);

/// How saves for a document are coordinated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinationMode {
    /// Field writes go out immediately as keyed upserts
    Immediate,

    /// Whole/partial-document writes; a second save waits for the first
    Queued,

    /// Saving disabled for this document
    Disabled,
}

/// Per-document save configuration derived from the document's save-mode flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfig {
    pub enabled: bool,
    pub bypass_version_check: bool,
    pub mode: CoordinationMode,
}

pub fn save_config(per_cell_save_enabled: bool) -> SaveConfig {
    if per_cell_save_enabled {
        // Field writes are upserts keyed by item+field, not subject to
        // whole-document version races.
        SaveConfig {
            enabled: true,
            bypass_version_check: true,
            mode: CoordinationMode::Immediate,
        }
    } else {
        SaveConfig {
            enabled: true,
            bypass_version_check: false,
            mode: CoordinationMode::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveStrategy {
    PerCell,
    Delta,
}

/// The single decision point consulted before every save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCoordination {
    pub strategy: SaveStrategy,
    pub requires_structural_coordination: bool,
    pub allows_concurrent_saves: bool,
}

pub fn save_coordination_strategy(config: &SaveConfig) -> SaveCoordination {
    match config.mode {
        CoordinationMode::Immediate => SaveCoordination {
            strategy: SaveStrategy::PerCell,
            // Structural edits still race with keyed upserts over row
            // identity, so coordination is required either way.
            requires_structural_coordination: true,
            allows_concurrent_saves: true,
        },
        CoordinationMode::Queued | CoordinationMode::Disabled => SaveCoordination {
            strategy: SaveStrategy::Delta,
            requires_structural_coordination: true,
            allows_concurrent_saves: false,
        },
    }
}

/// Race an asynchronous save against a deadline
///
/// A hang becomes an explicit `SaveTimeout`. The envelope abandons waiting,
/// not execution: the operation keeps running in the background and its
/// result is ignored. Timeout therefore means "unknown outcome" and the
/// write may still land, so retries must be idempotent (same key, last
/// value wins).
pub async fn with_timeout<T, F>(operation: F, label: &str, deadline: Duration) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(operation);
    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(CoordinationError::Transport(format!(
            "save task failed: {join_error}"
        ))),
        Err(_) => {
            let deadline_ms = deadline.as_millis() as u64;
            warn!(label, deadline_ms, "save timed out, outcome unknown");
            Err(CoordinationError::SaveTimeout {
                label: label.to_string(),
                deadline_ms,
            })
        }
    }
}

/// Partial-document payload for delta-mode writes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RundownDelta {
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub timezone: Option<String>,
    pub notes: Option<String>,
    pub items: Option<Vec<Item>>,
    pub columns: Option<Vec<Column>>,
}

impl RundownDelta {
    /// Delta carrying the full current item list, used after structural edits
    pub fn items_snapshot(rundown: &Rundown) -> Self {
        Self {
            items: Some(rundown.items.clone()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.start_time.is_none()
            && self.timezone.is_none()
            && self.notes.is_none()
            && self.items.is_none()
            && self.columns.is_none()
    }

    pub fn apply_to(&self, rundown: &mut Rundown) {
        if let Some(title) = &self.title {
            rundown.title = title.clone();
        }
        if let Some(start_time) = &self.start_time {
            rundown.start_time = Some(start_time.clone());
        }
        if let Some(timezone) = &self.timezone {
            rundown.timezone = Some(timezone.clone());
        }
        if let Some(notes) = &self.notes {
            rundown.notes = Some(notes.clone());
        }
        if let Some(items) = &self.items {
            rundown.items = items.clone();
        }
        if let Some(columns) = &self.columns {
            rundown.columns = columns.clone();
        }
    }
}

/// Target scope and payload of one save call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SaveScope {
    #[serde(rename = "field")]
    Field {
        item_id: ItemId,
        field: String,
        value: String,
    },

    #[serde(rename = "delta")]
    Delta { delta: RundownDelta },
}

/// Persistence interface consumed by the session
///
/// Assumed capabilities: atomic keyed upserts and version-guarded document
/// writes. Implemented by the transport/persistence collaborator, not here.
pub trait RundownStore: Send + Sync + 'static {
    /// Atomic single-field upsert keyed by (item, field)
    fn upsert_field(
        &self,
        rundown: RundownId,
        item: ItemId,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Version-guarded partial-document write; returns the new version or
    /// `VersionConflict`
    fn write_delta(
        &self,
        rundown: RundownId,
        delta: &RundownDelta,
        expected_version: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Full snapshot reload, used by the resync path
    fn fetch(&self, rundown: RundownId) -> impl Future<Output = Result<Rundown>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_per_cell_strategy() {
        let config = save_config(true);
        assert!(config.bypass_version_check);
        assert_eq!(config.mode, CoordinationMode::Immediate);

        let coordination = save_coordination_strategy(&config);
        assert_eq!(coordination.strategy, SaveStrategy::PerCell);
        assert!(coordination.allows_concurrent_saves);
        assert!(coordination.requires_structural_coordination);
    }

    #[test]
    fn test_delta_strategy() {
        let config = save_config(false);
        assert!(!config.bypass_version_check);
        assert_eq!(config.mode, CoordinationMode::Queued);

        let coordination = save_coordination_strategy(&config);
        assert_eq!(coordination.strategy, SaveStrategy::Delta);
        assert!(!coordination.allows_concurrent_saves);
        assert!(coordination.requires_structural_coordination);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_deadline_not_at_completion() {
        let started = Instant::now();

        let result: Result<()> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
            "cell update",
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(
            result,
            Err(CoordinationError::SaveTimeout { deadline_ms: 50, .. })
        ));
        // Fails at ~50ms, not after the 200ms operation.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_passes_through_completion() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(42)
            },
            "cell update",
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_delta_apply() {
        let mut doc = Rundown::new("Draft");
        let delta = RundownDelta {
            title: Some("Final".to_string()),
            timezone: Some("UTC".to_string()),
            ..RundownDelta::default()
        };

        assert!(!delta.is_empty());
        delta.apply_to(&mut doc);

        assert_eq!(doc.title, "Final");
        assert_eq!(doc.timezone.as_deref(), Some("UTC"));
        assert!(doc.notes.is_none());
    }
}
