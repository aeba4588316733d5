/// Editor session: one client's coordination context for one rundown
/// Owns the cached document copy and routes every edit through the
/// coordinator, the strategy selector, and the timeout envelope
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, Notify};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use rundown::{ItemId, Rundown, ShowcallerState};

use crate::{
    detect_conflict, origin_token, save_config, save_coordination_strategy, with_timeout,
    ActivityTracker, Admission, ConflictRecord, CoordinationError, CoordinationStatus, EventScope,
    FieldKey, OpClass, Operation, OperationCoordinator, OperationId, OperationKind, PlaybackKind,
    Result, RundownDelta, RundownEvent, RundownStore, SaveStrategy, StructuralKind, TabId,
    VisibilityResync, ResyncHandle, DEFAULT_SAVE_DEADLINE,
};

/// Derived observability state exposed to UI collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_saving: bool,
    pub has_pending_changes: bool,
    pub last_save_time: Option<chrono::DateTime<chrono::Utc>>,
    pub has_conflicts: bool,
    pub conflict_count: usize,
    pub coordination: CoordinationStatus,
}

struct SessionState {
    rundown: Rundown,
    showcaller: ShowcallerState,
    coordinator: OperationCoordinator,
    /// Completion channels for queued operations, resolved by the drain loop
    completions: HashMap<OperationId, oneshot::Sender<Result<()>>>,
    conflicts: Vec<ConflictRecord>,
    saving: bool,
    /// Delta saves parked behind an in-flight one
    waiting_saves: usize,
    has_pending_changes: bool,
    last_save_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// One client's session over a shared rundown
///
/// State lives behind a short-held lock that is never kept across an await
/// point; the coordinator's flags do the actual serialization, cooperative
/// rather than blocking. Cloning yields another handle to the same session.
pub struct EditorSession<S: RundownStore> {
    tab: TabId,
    store: Arc<S>,
    state: Arc<Mutex<SessionState>>,
    activity: ActivityTracker,
    save_done: Arc<Notify>,
    save_deadline: Duration,
}

impl<S: RundownStore> Clone for EditorSession<S> {
    fn clone(&self) -> Self {
        Self {
            tab: self.tab,
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            activity: self.activity.clone(),
            save_done: Arc::clone(&self.save_done),
            save_deadline: self.save_deadline,
        }
    }
}

impl<S: RundownStore> EditorSession<S> {
    /// Session tagged with this client's process-lifetime origin token
    pub fn new(store: S, rundown: Rundown) -> Self {
        Self::with_tab(store, rundown, origin_token())
    }

    /// Session with an explicit origin tab, for hosting several logical
    /// clients in one process
    pub fn with_tab(store: S, rundown: Rundown, tab: TabId) -> Self {
        Self {
            tab,
            store: Arc::new(store),
            state: Arc::new(Mutex::new(SessionState {
                rundown,
                showcaller: ShowcallerState::new(),
                coordinator: OperationCoordinator::new(),
                completions: HashMap::new(),
                conflicts: Vec::new(),
                saving: false,
                waiting_saves: 0,
                has_pending_changes: false,
                last_save_time: None,
            })),
            activity: ActivityTracker::new(),
            save_done: Arc::new(Notify::new()),
            save_deadline: DEFAULT_SAVE_DEADLINE,
        }
    }

    pub fn with_save_deadline(mut self, deadline: Duration) -> Self {
        self.save_deadline = deadline;
        self
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Snapshot of the cached document
    pub fn rundown(&self) -> Rundown {
        self.lock_state().rundown.clone()
    }

    pub fn showcaller(&self) -> ShowcallerState {
        self.lock_state().showcaller.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.lock_state();
        SessionStatus {
            is_saving: state.saving,
            has_pending_changes: state.has_pending_changes,
            last_save_time: state.last_save_time,
            has_conflicts: !state.conflicts.is_empty(),
            conflict_count: state.conflicts.len(),
            coordination: state.coordinator.status(),
        }
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.lock_state().conflicts.clone()
    }

    /// Hand the accumulated conflict records to the UI and clear them
    pub fn acknowledge_conflicts(&self) -> Vec<ConflictRecord> {
        std::mem::take(&mut self.lock_state().conflicts)
    }

    /// Field-level focus wiring
    pub fn mark_field_active(&self, item_id: ItemId, field: &str) {
        self.activity.mark_active(FieldKey::new(item_id, field));
    }

    pub fn is_field_active(&self, item_id: ItemId, field: &str) -> bool {
        self.activity.is_active(&FieldKey::new(item_id, field))
    }

    /// Commit a keystroke-level edit to a single field
    ///
    /// Marks the field active, then routes the save through the strategy
    /// selector under the coordinator.
    pub async fn edit_field(&self, item_id: ItemId, field: &str, value: &str) -> Result<()> {
        self.activity.mark_active(FieldKey::new(item_id, field));
        let op = Operation::new(
            self.tab,
            OperationKind::CellEdit {
                item_id,
                field: field.to_string(),
                value: value.to_string(),
            },
        );
        self.submit(op).await
    }

    /// Row insert/delete/reorder/paste; one at a time per document
    pub async fn apply_structural(&self, kind: StructuralKind) -> Result<()> {
        self.submit(Operation::new(self.tab, OperationKind::Structural(kind)))
            .await
    }

    /// Showcaller control
    pub async fn playback(&self, kind: PlaybackKind) -> Result<()> {
        self.submit(Operation::new(self.tab, OperationKind::Playback(kind)))
            .await
    }

    /// Hand an operation to the coordinator and await its outcome
    ///
    /// A queued operation's submitter waits on a completion channel resolved
    /// by the drain loop, so each caller observes its own operation's result
    /// rather than whatever the drain happened to run.
    async fn submit(&self, op: Operation) -> Result<()> {
        enum Submitted {
            Ready(Operation),
            Waiting(oneshot::Receiver<Result<()>>),
        }

        let op_id = op.id;
        let class = op.class();
        let submitted = {
            let mut state = self.lock_state();
            match state.coordinator.admit(op) {
                Admission::Ready(op) => Submitted::Ready(op),
                Admission::Queued { position } => {
                    debug!(position, "operation queued behind in-flight work");
                    let (sender, receiver) = oneshot::channel();
                    state.completions.insert(op_id, sender);
                    // Playback is not a content change and never saves.
                    if class != OpClass::Playback {
                        state.has_pending_changes = true;
                    }
                    Submitted::Waiting(receiver)
                }
            }
        };

        match submitted {
            Submitted::Ready(op) => self.run_ready(op).await,
            Submitted::Waiting(receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(CoordinationError::Transport(
                    "queued operation dropped before it ran".to_string(),
                )),
            },
        }
    }

    /// Run an admitted operation, then drain and run anything it released
    ///
    /// The in-progress flag for each operation is released on every exit
    /// path before its error propagates. Released queued operations are
    /// re-attempted in order, never discarded, and each result is delivered
    /// to the submitter that queued it.
    async fn run_ready(&self, op: Operation) -> Result<()> {
        let head_id = op.id;
        let mut worklist = VecDeque::from([op]);
        let mut head_result = Ok(());

        while let Some(op) = worklist.pop_front() {
            let op_id = op.id;
            let class = op.class();
            let result = self.apply_and_save(op).await;
            let sender = {
                let mut state = self.lock_state();
                let released = state.coordinator.finish(class);
                worklist.extend(released);
                state.completions.remove(&op_id)
            };

            if let Err(error) = &result {
                warn!(%error, ?class, "operation failed");
            }
            if op_id == head_id {
                head_result = result;
            } else if let Some(sender) = sender {
                // A dropped receiver means the submitter went away; the
                // operation itself already ran.
                let _ = sender.send(result);
            }
        }

        head_result
    }

    async fn apply_and_save(&self, op: Operation) -> Result<()> {
        match &op.kind {
            OperationKind::CellEdit {
                item_id,
                field,
                value,
            } => {
                let (rundown_id, strategy, expected) = {
                    let mut state = self.lock_state();
                    let state = &mut *state;
                    op.kind.apply(&mut state.rundown, &mut state.showcaller)?;
                    let config = save_config(state.rundown.per_cell_save_enabled);
                    let strategy = save_coordination_strategy(&config).strategy;
                    (state.rundown.id, strategy, state.rundown.version)
                };

                match strategy {
                    SaveStrategy::PerCell => {
                        let store = Arc::clone(&self.store);
                        let (item_id, field, value) = (*item_id, field.clone(), value.clone());
                        self.lock_state().saving = true;
                        let result = with_timeout(
                            async move { store.upsert_field(rundown_id, item_id, &field, &value).await },
                            "cell update",
                            self.save_deadline,
                        )
                        .await;
                        self.lock_state().saving = false;

                        match result {
                            Ok(()) => {
                                self.record_save();
                                Ok(())
                            }
                            Err(error) => {
                                self.lock_state().has_pending_changes = true;
                                Err(error)
                            }
                        }
                    }
                    SaveStrategy::Delta => {
                        let delta = RundownDelta::items_snapshot(&self.lock_state().rundown);
                        self.save_delta(delta, expected, "cell update").await
                    }
                }
            }

            OperationKind::Structural(_) => {
                let (expected, delta) = {
                    let mut state = self.lock_state();
                    let state = &mut *state;
                    let expected = state.rundown.version;
                    op.kind.apply(&mut state.rundown, &mut state.showcaller)?;
                    (expected, RundownDelta::items_snapshot(&state.rundown))
                };
                self.save_delta(delta, expected, "structural change").await
            }

            OperationKind::Playback(_) => {
                // Cursor moves are broadcast by the transport collaborator,
                // not persisted through the store.
                let mut state = self.lock_state();
                let state = &mut *state;
                op.kind.apply(&mut state.rundown, &mut state.showcaller)
            }
        }
    }

    /// Version-guarded delta write; one in flight at a time
    ///
    /// A save arriving while another is in flight waits for it to resolve,
    /// then re-snapshots the document so the flush carries the latest local
    /// state rather than the payload captured before the wait.
    async fn save_delta(&self, mut delta: RundownDelta, mut expected: u64, label: &str) -> Result<()> {
        let rundown_id = loop {
            let in_flight = self.save_done.notified();
            {
                let mut state = self.lock_state();
                if !state.saving {
                    state.saving = true;
                    break state.rundown.id;
                }
                state.has_pending_changes = true;
                state.waiting_saves += 1;
            }
            in_flight.await;
            let mut state = self.lock_state();
            state.waiting_saves -= 1;
            delta = RundownDelta::items_snapshot(&state.rundown);
            expected = state.rundown.version;
        };

        let store = Arc::clone(&self.store);
        let result = with_timeout(
            async move { store.write_delta(rundown_id, &delta, expected).await },
            label,
            self.save_deadline,
        )
        .await;
        {
            self.lock_state().saving = false;
            self.save_done.notify_one();
        }

        match result {
            Ok(new_version) => {
                self.lock_state().rundown.version = new_version;
                self.record_save();
                Ok(())
            }
            Err(CoordinationError::VersionConflict { expected, found }) => {
                warn!(expected, found, "delta save lost the version race, refetching");
                self.lock_state().has_pending_changes = true;

                match self.store.fetch(rundown_id).await {
                    Ok(remote) => {
                        let mut state = self.lock_state();
                        if let Some(record) = detect_conflict(&state.rundown, &remote) {
                            info!(reasons = ?record.reasons, "conflict with remote state");
                            state.push_conflict(record);
                        }
                        // Rebase onto the remote version; local content stays
                        // for the retry (last-writer-wins with detection).
                        state.rundown.version = remote.version;
                    }
                    Err(fetch_error) => {
                        warn!(%fetch_error, "refetch after version conflict failed");
                    }
                }

                Err(CoordinationError::VersionConflict { expected, found })
            }
            Err(other) => {
                self.lock_state().has_pending_changes = true;
                Err(other)
            }
        }
    }

    /// Reconcile an inbound push-channel event
    ///
    /// Idempotent under at-least-once redelivery. Self-originated echoes
    /// are dropped; fields a human is actively typing into are never
    /// overwritten.
    pub fn handle_remote_event(&self, event: RundownEvent) {
        if event.origin == self.tab {
            debug!(op_origin = %event.origin, "dropping self-originated echo");
            return;
        }

        match event.scope {
            EventScope::Field {
                item_id,
                field,
                value,
            } => {
                let key = FieldKey::new(item_id, field.clone());
                if self.activity.is_active(&key) {
                    debug!(field = %key, "suppressing remote overwrite of actively edited field");
                    return;
                }

                let mut state = self.lock_state();
                match state.rundown.upsert_field(item_id, &field, &value) {
                    Ok(()) => {
                        state.rundown.version = state.rundown.version.max(event.version);
                    }
                    Err(_) => {
                        // Unordered delivery can reference an item this tab
                        // has not seen yet; the next snapshot or resync
                        // catches up.
                        debug!(item = %item_id, "field event for unknown item ignored");
                    }
                }
            }

            EventScope::Snapshot { rundown: remote } => {
                let active = self.activity.active_fields();
                let mut state = self.lock_state();

                if remote.version < state.rundown.version {
                    debug!(
                        remote = remote.version,
                        local = state.rundown.version,
                        "ignoring stale snapshot"
                    );
                    return;
                }

                // Conflicts only exist against unsaved local work; adopting
                // a newer snapshot over clean state is just progress.
                if state.has_pending_changes || state.saving {
                    if let Some(record) = detect_conflict(&state.rundown, &remote) {
                        info!(reasons = ?record.reasons, "conflict with remote snapshot");
                        state.push_conflict(record);
                    }
                }

                let local = std::mem::replace(&mut state.rundown, remote);
                for key in active {
                    if let Some(value) = local
                        .item(key.item_id)
                        .and_then(|item| item.field(&key.field))
                    {
                        // Keep the value under the user's cursor.
                        let _ = state.rundown.upsert_field(key.item_id, &key.field, value);
                    }
                }
            }

            EventScope::Showcaller { state: cursor } => {
                self.lock_state().showcaller = cursor;
            }
        }
    }

    /// Full reload, bypassing incremental reconciliation
    ///
    /// Used when staleness risk is high (tab was hidden, channel dropped).
    /// Unacknowledged conflicts survive the reload.
    pub async fn resync(&self) -> Result<()> {
        let rundown_id = self.lock_state().rundown.id;
        info!(rundown = %rundown_id, "full resync");
        let fresh = self.store.fetch(rundown_id).await?;

        let mut state = self.lock_state();
        state.rundown = fresh;
        state.has_pending_changes = false;
        Ok(())
    }

    /// Wire this session's full-reload path to a visibility trigger
    pub fn register_resync(&self, trigger: &VisibilityResync) -> ResyncHandle {
        let session = self.clone();
        trigger.register(move |hidden_for| {
            let session = session.clone();
            Box::pin(async move {
                debug!(hidden_ms = hidden_for.as_millis() as u64, "visibility resync");
                session.resync().await
            })
        })
    }

    fn record_save(&self) {
        let mut state = self.lock_state();
        state.last_save_time = Some(chrono::Utc::now());
        // Dirty until every queued operation and parked save has flushed.
        if state.coordinator.status().queued == 0 && state.waiting_saves == 0 {
            state.has_pending_changes = false;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionState {
    /// Redelivered events must not inflate the conflict count
    fn push_conflict(&mut self, record: ConflictRecord) {
        let duplicate = self.conflicts.iter().any(|existing| {
            existing.local_signature == record.local_signature
                && existing.remote_signature == record.remote_signature
                && existing.reasons == record.reasons
        });
        if !duplicate {
            self.conflicts.push(record);
        }
    }
}
