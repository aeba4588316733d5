/// Per-document operation admission
/// Serializes structural edits against cell-level and playback operations,
/// with a FIFO pending queue for anything that must wait its turn
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{OpClass, Operation, OperationId};

/// Outcome of asking the coordinator to run an operation
#[derive(Debug)]
pub enum Admission {
    /// The operation may run now; the caller must report completion via
    /// `finish` on every exit path, success or error.
    Ready(Operation),

    /// Another operation class holds the document; the operation was
    /// appended to the pending queue and will be released in arrival order.
    Queued { position: usize },
}

/// Observability snapshot of the coordination state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationStatus {
    pub structural_in_progress: bool,
    pub active_cell_edits: usize,
    pub active_playback_ops: usize,
    pub queued: usize,
}

/// Explicit state machine for one logical document
///
/// The "locks" here are cooperative flags under the single-threaded
/// execution model, not OS mutexes. Owned by the session and injected where
/// needed so multiple documents coordinate independently.
#[derive(Debug, Default)]
pub struct OperationCoordinator {
    structural_in_progress: bool,
    active_cell_edits: usize,
    active_playback_ops: usize,
    pending: VecDeque<Operation>,
}

impl OperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn admissible(&self, class: OpClass) -> bool {
        match class {
            // One structural op at a time, and never alongside in-flight
            // cell or playback ops: row identity and order may change under
            // them.
            OpClass::Structural => {
                !self.structural_in_progress
                    && self.active_cell_edits == 0
                    && self.active_playback_ops == 0
            }
            // Cell edits and playback ops run concurrently with each other
            // but wait out any in-flight structural op.
            OpClass::Cell | OpClass::Playback => !self.structural_in_progress,
        }
    }

    fn mark_started(&mut self, class: OpClass) {
        match class {
            OpClass::Structural => self.structural_in_progress = true,
            OpClass::Cell => self.active_cell_edits += 1,
            OpClass::Playback => self.active_playback_ops += 1,
        }
    }

    /// Admit an operation, either for immediate execution or queued
    ///
    /// Anything arriving while the queue is non-empty queues behind it, so a
    /// waiting structural op cannot be starved by a stream of cell edits.
    pub fn admit(&mut self, op: Operation) -> Admission {
        let class = op.class();
        if self.pending.is_empty() && self.admissible(class) {
            self.mark_started(class);
            debug!(?class, op = ?op.id, "operation admitted");
            Admission::Ready(op)
        } else {
            self.pending.push_back(op);
            let position = self.pending.len() - 1;
            debug!(?class, position, "operation queued");
            Admission::Queued { position }
        }
    }

    /// Report completion of an in-flight operation and drain the queue
    ///
    /// Must be called on every exit path, including failures, so a single
    /// failed operation can never wedge the machine. Returns the queued
    /// operations that became admissible, in strict arrival order, already
    /// marked in progress; the caller applies each and calls `finish` for it
    /// in turn.
    pub fn finish(&mut self, class: OpClass) -> Vec<Operation> {
        match class {
            OpClass::Structural => self.structural_in_progress = false,
            OpClass::Cell => self.active_cell_edits = self.active_cell_edits.saturating_sub(1),
            OpClass::Playback => {
                self.active_playback_ops = self.active_playback_ops.saturating_sub(1)
            }
        }
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<Operation> {
        let mut ready = Vec::new();
        loop {
            let admissible = match self.pending.front() {
                Some(op) => self.admissible(op.class()),
                None => break,
            };
            if !admissible {
                break;
            }
            if let Some(op) = self.pending.pop_front() {
                self.mark_started(op.class());
                debug!(op = ?op.id, "queued operation released");
                ready.push(op);
            }
        }
        ready
    }

    /// Drop a queued operation before it runs; in-flight ops cannot be
    /// cancelled here
    pub fn cancel_queued(&mut self, id: OperationId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|op| op.id != id);
        before != self.pending.len()
    }

    pub fn status(&self) -> CoordinationStatus {
        CoordinationStatus {
            structural_in_progress: self.structural_in_progress,
            active_cell_edits: self.active_cell_edits,
            active_playback_ops: self.active_playback_ops,
            queued: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OperationKind, PlaybackKind, StructuralKind, TabId};
    use rundown::ItemId;

    fn cell_edit() -> Operation {
        Operation::new(
            TabId::new(),
            OperationKind::CellEdit {
                item_id: ItemId::new(),
                field: "slug".to_string(),
                value: "x".to_string(),
            },
        )
    }

    fn structural() -> Operation {
        Operation::new(
            TabId::new(),
            OperationKind::Structural(StructuralKind::Delete {
                item_ids: vec![ItemId::new()],
            }),
        )
    }

    fn playback() -> Operation {
        Operation::new(
            TabId::new(),
            OperationKind::Playback(PlaybackKind::Advance),
        )
    }

    #[test]
    fn test_second_structural_queues_and_drains_in_order() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(structural()), Admission::Ready(_)));

        let second = structural();
        let second_id = second.id;
        let third = structural();
        let third_id = third.id;
        assert!(matches!(
            coord.admit(second),
            Admission::Queued { position: 0 }
        ));
        assert!(matches!(
            coord.admit(third),
            Admission::Queued { position: 1 }
        ));

        // First completes: exactly the second is released, in arrival order.
        let released = coord.finish(OpClass::Structural);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, second_id);
        assert!(coord.status().structural_in_progress);

        let released = coord.finish(OpClass::Structural);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, third_id);
    }

    #[test]
    fn test_cell_edits_queue_behind_structural() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(structural()), Admission::Ready(_)));
        assert!(matches!(coord.admit(cell_edit()), Admission::Queued { .. }));
        assert!(matches!(coord.admit(cell_edit()), Admission::Queued { .. }));

        // Queued cell edits survive the structural op and both release.
        let released = coord.finish(OpClass::Structural);
        assert_eq!(released.len(), 2);
        assert_eq!(coord.status().active_cell_edits, 2);
    }

    #[test]
    fn test_cell_and_playback_run_concurrently() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(cell_edit()), Admission::Ready(_)));
        assert!(matches!(coord.admit(playback()), Admission::Ready(_)));

        let status = coord.status();
        assert_eq!(status.active_cell_edits, 1);
        assert_eq!(status.active_playback_ops, 1);
    }

    #[test]
    fn test_structural_waits_for_cell_edits() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(cell_edit()), Admission::Ready(_)));
        assert!(matches!(coord.admit(structural()), Admission::Queued { .. }));

        // A cell edit arriving behind a queued structural op queues too,
        // so the structural op cannot be starved.
        assert!(matches!(coord.admit(cell_edit()), Admission::Queued { .. }));

        let released = coord.finish(OpClass::Cell);
        assert_eq!(released.len(), 1);
        assert!(matches!(
            released[0].kind,
            OperationKind::Structural(_)
        ));
        // The trailing cell edit stays queued until the structural finishes.
        assert_eq!(coord.status().queued, 1);
    }

    #[test]
    fn test_finish_after_failure_releases_flag() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(structural()), Admission::Ready(_)));
        // The operation failed; the caller still reports completion.
        coord.finish(OpClass::Structural);

        assert!(!coord.status().structural_in_progress);
        assert!(matches!(coord.admit(structural()), Admission::Ready(_)));
    }

    #[test]
    fn test_cancel_queued() {
        let mut coord = OperationCoordinator::new();

        assert!(matches!(coord.admit(structural()), Admission::Ready(_)));
        let queued = cell_edit();
        let queued_id = queued.id;
        coord.admit(queued);

        assert!(coord.cancel_queued(queued_id));
        assert!(!coord.cancel_queued(queued_id));
        assert_eq!(coord.finish(OpClass::Structural).len(), 0);
    }
}
