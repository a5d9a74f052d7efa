//! Client core for the task board: column-partitioned board state,
//! drag-and-drop planning, optimistic status commits with full resync on
//! failure, and the REST/session plumbing underneath.

pub mod board;
pub mod config;
pub mod controller;
pub mod planner;
pub mod reconcile;
pub mod remote;
pub mod session;

pub use board::{BoardError, BoardState, Column};
pub use controller::{
    AppliedTransition, BoardController, BoardEvent, BoardSnapshot, BoardStatus, DragOutcome,
    PendingCommit,
};
pub use planner::{plan, plan_against, DragEvent, DragLocation, Transition};
pub use reconcile::{CommitAgent, CommitError, CommitOutcome, CommitPhase, MoveCommit};
pub use remote::{BoardScope, HttpTaskStore, RemoteError, TaskStore};
pub use session::{AuthClient, Session, SharedSession};

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod board_tests;

#[cfg(test)]
#[path = "tests/planner_tests.rs"]
mod planner_tests;

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod controller_tests;

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod remote_tests;
