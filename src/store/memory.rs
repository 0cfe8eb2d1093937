//! In-process task store with scripted failures and a call journal.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{Task, TaskDraft, TaskFilter, TaskId, TaskStatus};

use super::{StoreError, TaskStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List(TaskFilter),
    Create(String),
    Update(TaskId),
    Delete(TaskId),
    Move(TaskId, TaskStatus),
    BulkReplace(usize),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StoreOp {
    List,
    Create,
    Update,
    Delete,
    Move,
    BulkReplace,
}

impl StoreCall {
    fn op(&self) -> StoreOp {
        match self {
            Self::List(_) => StoreOp::List,
            Self::Create(_) => StoreOp::Create,
            Self::Update(_) => StoreOp::Update,
            Self::Delete(_) => StoreOp::Delete,
            Self::Move(..) => StoreOp::Move,
            Self::BulkReplace(_) => StoreOp::BulkReplace,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: Vec<Task>,
    calls: Vec<StoreCall>,
    failures: VecDeque<(StoreOp, StoreError)>,
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tasks,
                ..MemoryState::default()
            }),
        }
    }

    /// Makes the next call of `op` fail with `error`. Failures queue up.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.lock().failures.push_back((op, error));
    }

    /// Current authoritative contents.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    /// Replaces contents without journaling, as another client would.
    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.lock().tasks = tasks;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, op: StoreOp) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Journals the call and pops a scripted failure for it, if any.
    fn begin(&self, call: StoreCall) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock();
        let op = call.op();
        state.calls.push(call);
        if let Some(index) = state.failures.iter().position(|(failing, _)| *failing == op)
            && let Some((_, error)) = state.failures.remove(index)
        {
            return Err(error);
        }
        Ok(state)
    }
}

fn validate_title(title: &str) -> Result<(), StoreError> {
    if title.trim().is_empty() {
        return Err(StoreError::Validation("title cannot be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let state = self.begin(StoreCall::List(filter.clone()))?;
        Ok(state
            .tasks
            .iter()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect())
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, StoreError> {
        let mut state = self.begin(StoreCall::Create(draft.title.clone()))?;
        validate_title(&draft.title)?;
        let task = draft.clone().into_task(TaskId::new(Uuid::new_v4().to_string()));
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update(&self, task: &Task) -> Result<Task, StoreError> {
        let mut state = self.begin(StoreCall::Update(task.id.clone()))?;
        validate_title(&task.title)?;
        let existing = state
            .tasks
            .iter_mut()
            .find(|existing| existing.id == task.id)
            .ok_or_else(|| StoreError::NotFound(task.id.clone()))?;
        *existing = task.clone();
        Ok(task.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut state = self.begin(StoreCall::Delete(id.clone()))?;
        let before = state.tasks.len();
        state.tasks.retain(|task| &task.id != id);
        if state.tasks.len() == before {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn move_task(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut state = self.begin(StoreCall::Move(id.clone(), status))?;
        let task = state
            .tasks
            .iter_mut()
            .find(|task| &task.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        task.status = status;
        Ok(())
    }

    async fn bulk_replace(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut state = self.begin(StoreCall::BulkReplace(tasks.len()))?;
        let mut seen = HashSet::new();
        for task in tasks {
            validate_title(&task.title)?;
            if !seen.insert(&task.id) {
                return Err(StoreError::Validation(format!("duplicate task id {}", task.id)));
            }
        }
        state.tasks = tasks.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryTaskStore {
        MemoryTaskStore::with_tasks(vec![
            Task::new("t1", "Plan", TaskStatus::Todo),
            Task::new("t2", "Build", TaskStatus::InProgress),
        ])
    }

    #[tokio::test]
    async fn move_updates_status_and_journals() {
        let store = store();
        store
            .move_task(&TaskId::from("t1"), TaskStatus::Done)
            .await
            .unwrap();
        assert_eq!(store.tasks()[0].status, TaskStatus::Done);
        assert_eq!(
            store.calls(),
            vec![StoreCall::Move(TaskId::from("t1"), TaskStatus::Done)]
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = store();
        let missing = TaskId::from("nope");
        assert_eq!(
            store.move_task(&missing, TaskStatus::Done).await,
            Err(StoreError::NotFound(missing.clone()))
        );
        assert_eq!(
            store.delete(&missing).await,
            Err(StoreError::NotFound(missing.clone()))
        );
        let ghost = Task::new("nope", "Ghost", TaskStatus::Todo);
        assert_eq!(
            store.update(&ghost).await,
            Err(StoreError::NotFound(missing))
        );
    }

    #[tokio::test]
    async fn create_assigns_id_and_validates_title() {
        let store = store();
        let created = store.create(&TaskDraft::new("Review")).await.unwrap();
        assert!(!created.id.as_str().is_empty());
        assert_eq!(store.tasks().len(), 3);

        let err = store.create(&TaskDraft::new("  ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.tasks().len(), 3);
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let store = store();
        let listed = store
            .list(&TaskFilter::new().with_status(TaskStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, TaskId::from("t2"));
    }

    #[tokio::test]
    async fn scripted_failure_hits_only_matching_op_once() {
        let store = store();
        store.fail_next(StoreOp::Move, StoreError::Unavailable("down".to_string()));

        assert!(store.list(&TaskFilter::new()).await.is_ok());
        assert_eq!(
            store.move_task(&TaskId::from("t1"), TaskStatus::Done).await,
            Err(StoreError::Unavailable("down".to_string()))
        );
        assert_eq!(store.tasks()[0].status, TaskStatus::Todo);
        assert!(store.move_task(&TaskId::from("t1"), TaskStatus::Done).await.is_ok());
        assert_eq!(store.count_calls(StoreOp::Move), 2);
    }

    #[tokio::test]
    async fn bulk_replace_is_all_or_nothing() {
        let store = store();
        let duplicate = vec![
            Task::new("a", "One", TaskStatus::Todo),
            Task::new("a", "Two", TaskStatus::Done),
        ];
        assert!(matches!(
            store.bulk_replace(&duplicate).await,
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.tasks().len(), 2);

        let replacement = vec![Task::new("z", "Only", TaskStatus::Done)];
        store.bulk_replace(&replacement).await.unwrap();
        assert_eq!(store.tasks(), replacement);
    }
}
