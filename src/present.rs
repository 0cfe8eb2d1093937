//! Seam between the engine and whatever renders the board.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::store::FailureKind;
use crate::types::{Task, TaskStatus};

/// Immutable working list. Every mutation swaps in a whole new snapshot.
pub type TaskSnapshot = Arc<[Task]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub kind: FailureKind,
    pub message: String,
}

pub trait Presenter: Send {
    fn present(&mut self, tasks: &TaskSnapshot);

    fn notify(&mut self, notice: &UserNotice);
}

/// Presenter that only logs, for headless use.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn present(&mut self, tasks: &TaskSnapshot) {
        debug!(task_count = tasks.len(), "working list replaced");
    }

    fn notify(&mut self, notice: &UserNotice) {
        warn!(kind = ?notice.kind, message = %notice.message, "user notice");
    }
}

#[derive(Debug, Default)]
struct Recorded {
    snapshots: Vec<TaskSnapshot>,
    notices: Vec<UserNotice>,
}

/// Keeps every snapshot and notice; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<TaskSnapshot> {
        self.lock().snapshots.last().cloned()
    }

    pub fn present_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    pub fn notices(&self) -> Vec<UserNotice> {
        self.lock().notices.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, tasks: &TaskSnapshot) {
        self.lock().snapshots.push(Arc::clone(tasks));
    }

    fn notify(&mut self, notice: &UserNotice) {
        self.lock().notices.push(notice.clone());
    }
}

/// Splits tasks into the three columns, in board order.
///
/// A column is exactly the tasks whose status matches it; the relative order
/// of the working list is preserved.
pub fn columns(tasks: &[Task]) -> [(TaskStatus, Vec<&Task>); 3] {
    TaskStatus::ALL.map(|status| {
        let column = tasks.iter().filter(|task| task.status == status).collect();
        (status, column)
    })
}

pub fn counts(tasks: &[Task]) -> [(TaskStatus, usize); 3] {
    TaskStatus::ALL.map(|status| {
        let count = tasks.iter().filter(|task| task.status == status).count();
        (status, count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> Vec<Task> {
        vec![
            Task::new("a", "A", TaskStatus::Done),
            Task::new("b", "B", TaskStatus::Todo),
            Task::new("c", "C", TaskStatus::Done),
        ]
    }

    #[test]
    fn columns_filter_by_status_in_board_order() {
        let tasks = tasks();
        let [(todo, todo_tasks), (doing, doing_tasks), (done, done_tasks)] = columns(&tasks);
        assert_eq!(todo, TaskStatus::Todo);
        assert_eq!(doing, TaskStatus::InProgress);
        assert_eq!(done, TaskStatus::Done);
        assert_eq!(todo_tasks.len(), 1);
        assert!(doing_tasks.is_empty());
        let done_ids: Vec<&str> = done_tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(done_ids, vec!["a", "c"]);
    }

    #[test]
    fn counts_cover_every_status() {
        assert_eq!(
            counts(&tasks()),
            [
                (TaskStatus::Todo, 1),
                (TaskStatus::InProgress, 0),
                (TaskStatus::Done, 2)
            ]
        );
    }

    #[test]
    fn recording_presenter_clones_share_history() {
        let recorder = RecordingPresenter::new();
        let mut handle = recorder.clone();
        let snapshot: TaskSnapshot = tasks().into();
        handle.present(&snapshot);
        handle.notify(&UserNotice {
            kind: FailureKind::RemoteUnavailable,
            message: "offline".to_string(),
        });
        assert_eq!(recorder.present_count(), 1);
        assert_eq!(recorder.latest().map(|s| s.len()), Some(3));
        assert_eq!(recorder.notices().len(), 1);
    }
}
