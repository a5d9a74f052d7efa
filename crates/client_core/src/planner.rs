//! Drag-end events to board transitions. No side effects.

use shared::domain::{BoardLayout, StatusKey, TaskId};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragLocation {
    pub column: StatusKey,
    pub index: usize,
}

impl DragLocation {
    pub fn new(column: impl Into<StatusKey>, index: usize) -> Self {
        Self {
            column: column.into(),
            index,
        }
    }
}

/// A drag gesture as the presentation layer reports it. `destination` is
/// `None` when the card was dropped outside every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragEvent {
    pub source: DragLocation,
    pub destination: Option<DragLocation>,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    NoOp,
    /// Display order only; never persisted.
    ReorderWithinColumn {
        column: StatusKey,
        from_index: usize,
        to_index: usize,
    },
    /// Changes the task's status and has to be committed remotely.
    CrossColumnMove {
        from_column: StatusKey,
        from_index: usize,
        to_column: StatusKey,
        to_index: usize,
        item_id: TaskId,
    },
}

impl Transition {
    pub fn requires_commit(&self) -> bool {
        matches!(self, Self::CrossColumnMove { .. })
    }
}

pub fn plan(event: &DragEvent) -> Transition {
    let Some(destination) = &event.destination else {
        return Transition::NoOp;
    };

    if event.source.column == destination.column {
        return Transition::ReorderWithinColumn {
            column: destination.column.clone(),
            from_index: event.source.index,
            to_index: destination.index,
        };
    }

    let Some(item_id) = TaskId::parse_draggable(&event.item_id) else {
        warn!(item_id = %event.item_id, "planner: unparsable draggable id, ignoring drop");
        return Transition::NoOp;
    };

    Transition::CrossColumnMove {
        from_column: event.source.column.clone(),
        from_index: event.source.index,
        to_column: destination.column.clone(),
        to_index: destination.index,
        item_id,
    }
}

/// [`plan`] plus a column check against `layout`: drops referencing a column
/// the board does not render are ignored.
pub fn plan_against(layout: &BoardLayout, event: &DragEvent) -> Transition {
    let transition = plan(event);
    let unknown = match &transition {
        Transition::NoOp => None,
        Transition::ReorderWithinColumn { column, .. } => {
            (!layout.contains(column)).then_some(column)
        }
        Transition::CrossColumnMove {
            from_column,
            to_column,
            ..
        } => [from_column, to_column]
            .into_iter()
            .find(|column| !layout.contains(column)),
    };

    if let Some(column) = unknown {
        warn!(column = %column, "planner: drop references unknown column, ignoring");
        return Transition::NoOp;
    }
    transition
}
