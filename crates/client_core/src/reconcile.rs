//! Commits cross-column moves and rebuilds the board from the remote store
//! when a commit fails.

use std::sync::Arc;

use shared::domain::{BoardLayout, StatusKey, TaskId};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    board::BoardState,
    remote::{BoardScope, RemoteError, TaskStore},
};

/// `Applied -> Committing -> {Committed | RolledBack}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Applied,
    Committing,
    Committed,
    RolledBack,
}

impl CommitPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Applied, Self::Committing)
                | (Self::Committing, Self::Committed)
                | (Self::Committing, Self::RolledBack)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("invalid commit transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: CommitPhase,
        to: CommitPhase,
    },
}

/// One optimistic cross-column move on its way to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCommit {
    task_id: TaskId,
    to_column: StatusKey,
    phase: CommitPhase,
}

impl MoveCommit {
    pub fn applied(task_id: TaskId, to_column: StatusKey) -> Self {
        Self {
            task_id,
            to_column,
            phase: CommitPhase::Applied,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn to_column(&self) -> &StatusKey {
        &self.to_column
    }

    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    pub fn advance(&mut self, next: CommitPhase) -> Result<(), CommitError> {
        if !self.phase.can_advance_to(next) {
            return Err(CommitError::InvalidTransition {
                task_id: self.task_id,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

#[derive(Debug)]
pub enum CommitOutcome {
    Committed,
    /// The caller must discard its board and resync.
    RolledBack(RemoteError),
}

#[derive(Clone)]
pub struct CommitAgent {
    store: Arc<dyn TaskStore>,
    scope: BoardScope,
}

impl CommitAgent {
    pub fn new(store: Arc<dyn TaskStore>, scope: BoardScope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> BoardScope {
        self.scope
    }

    /// Issues exactly one status update. Failures are not retried.
    pub async fn commit(&self, pending: &mut MoveCommit) -> Result<CommitOutcome, CommitError> {
        pending.advance(CommitPhase::Committing)?;
        match self
            .store
            .update_status(pending.task_id, &pending.to_column)
            .await
        {
            Ok(()) => {
                pending.advance(CommitPhase::Committed)?;
                info!(
                    task_id = pending.task_id.0,
                    status = %pending.to_column,
                    "reconcile: status update committed"
                );
                Ok(CommitOutcome::Committed)
            }
            Err(err) => {
                pending.advance(CommitPhase::RolledBack)?;
                warn!(
                    task_id = pending.task_id.0,
                    status = %pending.to_column,
                    error = %err,
                    "reconcile: status update failed, rolling back"
                );
                Ok(CommitOutcome::RolledBack(err))
            }
        }
    }

    /// Full resynchronization: a fresh fetch partitioned from scratch.
    pub async fn resync(&self, layout: &BoardLayout) -> Result<BoardState, RemoteError> {
        let tasks = self.store.fetch_tasks(self.scope).await?;
        let board = BoardState::load(layout.clone(), tasks);
        info!(
            scope = ?self.scope,
            tasks = board.total_len(),
            "reconcile: board loaded from remote store"
        );
        Ok(board)
    }
}
