//! Column-partitioned board state and its mutation primitives.

use std::collections::{HashMap, HashSet};

use shared::domain::{BoardLayout, StatusKey, Task, TaskId};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("index {index} out of range for column {column} (len {len})")]
    IndexOutOfRange {
        column: StatusKey,
        index: usize,
        len: usize,
    },
    #[error("unknown column {0}")]
    UnknownColumn(StatusKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub key: StatusKey,
    pub title: String,
    pub items: Vec<TaskId>,
}

impl Column {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Client-side view of the board. Every loaded task id sits in exactly one
/// column between completed operations.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    layout: BoardLayout,
    columns: Vec<Column>,
    tasks: HashMap<TaskId, Task>,
}

impl BoardState {
    /// Partitions `tasks` by status in input order. Tasks with a status
    /// outside the layout, and repeated ids after the first, are dropped.
    pub fn load(layout: BoardLayout, tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut columns: Vec<Column> = layout
            .columns
            .iter()
            .map(|spec| Column {
                key: spec.key.clone(),
                title: spec.title.clone(),
                items: Vec::new(),
            })
            .collect();
        let mut cache = HashMap::new();
        let mut seen = HashSet::new();

        for task in tasks {
            let Some(position) = layout.position(&task.status) else {
                debug!(task_id = task.id.0, status = %task.status, "board: dropping task with unrecognized status");
                continue;
            };
            if !seen.insert(task.id) {
                debug!(task_id = task.id.0, "board: dropping duplicate task id");
                continue;
            }
            columns[position].items.push(task.id);
            cache.insert(task.id, task);
        }

        Self {
            layout,
            columns,
            tasks: cache,
        }
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, key: &StatusKey) -> Option<&Column> {
        self.columns.iter().find(|column| &column.key == key)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn column_of(&self, id: TaskId) -> Option<&StatusKey> {
        self.columns
            .iter()
            .find(|column| column.items.contains(&id))
            .map(|column| &column.key)
    }

    pub fn total_len(&self) -> usize {
        self.columns.iter().map(Column::len).sum()
    }

    pub fn move_within_column(
        &mut self,
        column: &StatusKey,
        from_index: usize,
        to_index: usize,
    ) -> Result<TaskId, BoardError> {
        let position = self.column_position(column)?;
        let items = &mut self.columns[position].items;
        check_index(column, from_index, items.len())?;
        check_index(column, to_index, items.len())?;

        let moved = items.remove(from_index);
        items.insert(to_index, moved);
        Ok(moved)
    }

    pub fn move_across_columns(
        &mut self,
        from_column: &StatusKey,
        from_index: usize,
        to_column: &StatusKey,
        to_index: usize,
    ) -> Result<TaskId, BoardError> {
        let to_len = self.column_position(to_column).map(|p| self.columns[p].len())?;
        check_index(to_column, to_index, to_len)?;
        self.insert_across(from_column, from_index, to_column, to_index)
    }

    /// Like [`Self::move_across_columns`] but accepts `to_index == len`, i.e.
    /// dropping after the last card or into an empty column.
    pub(crate) fn move_across_columns_appending(
        &mut self,
        from_column: &StatusKey,
        from_index: usize,
        to_column: &StatusKey,
        to_index: usize,
    ) -> Result<TaskId, BoardError> {
        let to_len = self.column_position(to_column).map(|p| self.columns[p].len())?;
        check_index(to_column, to_index, to_len + 1)?;
        self.insert_across(from_column, from_index, to_column, to_index)
    }

    fn insert_across(
        &mut self,
        from_column: &StatusKey,
        from_index: usize,
        to_column: &StatusKey,
        to_index: usize,
    ) -> Result<TaskId, BoardError> {
        let from = self.column_position(from_column)?;
        let to = self.column_position(to_column)?;
        if from == to {
            return self.move_within_column(from_column, from_index, to_index);
        }
        check_index(from_column, from_index, self.columns[from].len())?;

        let moved = self.columns[from].items.remove(from_index);
        self.columns[to].items.insert(to_index, moved);
        if let Some(task) = self.tasks.get_mut(&moved) {
            task.status = to_column.clone();
        }
        Ok(moved)
    }

    fn column_position(&self, key: &StatusKey) -> Result<usize, BoardError> {
        self.columns
            .iter()
            .position(|column| &column.key == key)
            .ok_or_else(|| BoardError::UnknownColumn(key.clone()))
    }
}

fn check_index(column: &StatusKey, index: usize, len: usize) -> Result<(), BoardError> {
    if index < len {
        Ok(())
    } else {
        Err(BoardError::IndexOutOfRange {
            column: column.clone(),
            index,
            len,
        })
    }
}
