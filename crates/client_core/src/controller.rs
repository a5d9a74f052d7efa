//! Board controller: owns the board state, applies drag gestures
//! optimistically and drives commits and resyncs.

use std::sync::Arc;

use shared::domain::{BoardLayout, StatusKey, TaskId};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    board::{BoardError, BoardState},
    planner::{plan_against, DragEvent, Transition},
    reconcile::{CommitAgent, CommitOutcome, CommitPhase, MoveCommit},
    remote::{BoardScope, RemoteError, TaskStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardStatus {
    Unloaded,
    Loading,
    Ready,
    /// The last fetch failed; the board is not shown rather than shown stale.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    Loaded {
        tasks: usize,
    },
    MoveApplied {
        task_id: TaskId,
        to_column: StatusKey,
    },
    MoveCommitted {
        task_id: TaskId,
    },
    /// One-shot notification for a rolled back move.
    StatusUpdateFailed {
        task_id: TaskId,
        message: String,
    },
    BoardRefreshed {
        tasks: usize,
    },
    LoadFailed {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadReason {
    Mount,
    Rollback,
}

#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub board: Option<BoardState>,
    pub status: BoardStatus,
}

/// A cross-column move that has been applied locally and still has to be
/// committed.
#[derive(Debug)]
pub struct PendingCommit {
    commit: MoveCommit,
    generation: u64,
}

impl PendingCommit {
    pub fn task_id(&self) -> TaskId {
        self.commit.task_id()
    }

    pub fn to_column(&self) -> &StatusKey {
        self.commit.to_column()
    }
}

#[derive(Debug)]
pub enum AppliedTransition {
    NoOp,
    Reordered { column: StatusKey, task_id: TaskId },
    Moved(PendingCommit),
}

#[derive(Debug)]
pub enum DragOutcome {
    NoOp,
    Reordered {
        column: StatusKey,
        task_id: TaskId,
    },
    Committing {
        task_id: TaskId,
        handle: JoinHandle<CommitPhase>,
    },
    /// Malformed gesture, left the board untouched.
    Rejected(BoardError),
}

struct ControllerState {
    board: Option<BoardState>,
    status: BoardStatus,
    mounted: bool,
    generation: u64,
}

impl ControllerState {
    fn is_current(&self, generation: u64) -> bool {
        self.mounted && self.generation == generation
    }
}

pub struct BoardController {
    agent: CommitAgent,
    layout: BoardLayout,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<BoardEvent>,
}

impl BoardController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scope: BoardScope,
        layout: BoardLayout,
        event_buffer: usize,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Arc::new(Self {
            agent: CommitAgent::new(store, scope),
            layout,
            state: Mutex::new(ControllerState {
                board: None,
                status: BoardStatus::Unloaded,
                mounted: false,
                generation: 0,
            }),
            events,
        })
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn scope(&self) -> BoardScope {
        self.agent.scope()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let state = self.state.lock().await;
        BoardSnapshot {
            board: state.board.clone(),
            status: state.status.clone(),
        }
    }

    pub async fn mount(&self) -> Result<(), RemoteError> {
        let generation = {
            let mut state = self.state.lock().await;
            state.mounted = true;
            state.status = BoardStatus::Loading;
            state.generation
        };
        self.reload(generation, ReloadReason::Mount).await
    }

    /// Drops the board. Results of requests still in flight are ignored.
    pub async fn unmount(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.mounted = false;
        state.board = None;
        state.status = BoardStatus::Unloaded;
        debug!(generation = state.generation, "controller: unmounted");
    }

    async fn reload(&self, generation: u64, reason: ReloadReason) -> Result<(), RemoteError> {
        let result = self.agent.resync(&self.layout).await;

        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            debug!(?reason, "controller: abandoning reload for unmounted board");
            return Ok(());
        }

        match result {
            Ok(board) => {
                let tasks = board.total_len();
                state.board = Some(board);
                state.status = BoardStatus::Ready;
                let event = match reason {
                    ReloadReason::Mount => BoardEvent::Loaded { tasks },
                    ReloadReason::Rollback => BoardEvent::BoardRefreshed { tasks },
                };
                let _ = self.events.send(event);
                Ok(())
            }
            Err(err) => {
                error!(?reason, error = %err, "controller: failed to load board");
                let message = err.to_string();
                state.board = None;
                state.status = BoardStatus::Error(message.clone());
                let _ = self.events.send(BoardEvent::LoadFailed { message });
                Err(err)
            }
        }
    }

    /// Plans `event` and applies it to the local board. Cross-column drops may
    /// land one past the last card of the destination.
    pub async fn apply(&self, event: &DragEvent) -> Result<AppliedTransition, BoardError> {
        let transition = plan_against(&self.layout, event);
        let mut state = self.state.lock().await;
        let generation = state.generation;
        let Some(board) = state.board.as_mut() else {
            if transition != Transition::NoOp {
                warn!("controller: drop received before the board was loaded");
            }
            return Ok(AppliedTransition::NoOp);
        };

        match transition {
            Transition::NoOp => Ok(AppliedTransition::NoOp),
            Transition::ReorderWithinColumn {
                column,
                from_index,
                to_index,
            } => {
                let task_id = board.move_within_column(&column, from_index, to_index)?;
                Ok(AppliedTransition::Reordered { column, task_id })
            }
            Transition::CrossColumnMove {
                from_column,
                from_index,
                to_column,
                to_index,
                item_id,
            } => {
                let at_source = board
                    .column(&from_column)
                    .and_then(|column| column.items.get(from_index).copied());
                if at_source.is_some() && at_source != Some(item_id) {
                    warn!(
                        task_id = item_id.0,
                        column = %from_column,
                        index = from_index,
                        "controller: dragged id does not match the card at the source index, ignoring"
                    );
                    return Ok(AppliedTransition::NoOp);
                }

                let task_id = board.move_across_columns_appending(
                    &from_column,
                    from_index,
                    &to_column,
                    to_index,
                )?;
                let _ = self.events.send(BoardEvent::MoveApplied {
                    task_id,
                    to_column: to_column.clone(),
                });
                Ok(AppliedTransition::Moved(PendingCommit {
                    commit: MoveCommit::applied(task_id, to_column),
                    generation,
                }))
            }
        }
    }

    /// Persists an applied move. On failure the board is rebuilt from the
    /// remote store, unless it was unmounted in the meantime.
    pub async fn commit(&self, pending: PendingCommit) -> CommitPhase {
        let PendingCommit {
            mut commit,
            generation,
        } = pending;
        let task_id = commit.task_id();

        let outcome = match self.agent.commit(&mut commit).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "controller: commit state machine violated");
                return commit.phase();
            }
        };

        let current = self.state.lock().await.is_current(generation);
        if !current {
            debug!(task_id = task_id.0, "controller: ignoring commit result for unmounted board");
            return commit.phase();
        }

        match outcome {
            CommitOutcome::Committed => {
                let _ = self.events.send(BoardEvent::MoveCommitted { task_id });
            }
            CommitOutcome::RolledBack(err) => {
                let _ = self.events.send(BoardEvent::StatusUpdateFailed {
                    task_id,
                    message: format!("status update failed, board refreshed: {err}"),
                });
                if let Err(err) = self.reload(generation, ReloadReason::Rollback).await {
                    warn!(error = %err, "controller: resync after rollback failed");
                }
            }
        }
        commit.phase()
    }

    /// Full drag-end flow. Local effects are visible when this returns;
    /// the remote commit of a cross-column move runs on its own task.
    pub async fn on_drag_end(self: &Arc<Self>, event: DragEvent) -> DragOutcome {
        match self.apply(&event).await {
            Ok(AppliedTransition::NoOp) => DragOutcome::NoOp,
            Ok(AppliedTransition::Reordered { column, task_id }) => {
                DragOutcome::Reordered { column, task_id }
            }
            Ok(AppliedTransition::Moved(pending)) => {
                let task_id = pending.task_id();
                info!(
                    task_id = task_id.0,
                    to_column = %pending.to_column(),
                    "controller: move applied, committing"
                );
                let controller = Arc::clone(self);
                let handle = tokio::spawn(async move { controller.commit(pending).await });
                DragOutcome::Committing { task_id, handle }
            }
            Err(err) => {
                warn!(error = %err, item_id = %event.item_id, "controller: ignoring malformed drop");
                DragOutcome::Rejected(err)
            }
        }
    }
}
