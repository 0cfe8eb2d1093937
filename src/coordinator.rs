//! Optimistic mutation coordinator.
//!
//! Every mutation is applied to the working list at once and handed to the
//! presenter, then the matching remote call runs in the background. Results
//! come back as [`Completion`]s which the owner feeds to
//! [`OptimisticCoordinator::handle_completion`] on its own loop, so the
//! working list only ever changes on one logical thread.
//!
//! Remote calls for one task id never overlap: while a call for a task is in
//! flight, later calls for it wait in a per-task queue (consecutive moves are
//! coalesced). A failed call drops that queue and rolls back by refetching
//! the authoritative list.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::present::{Presenter, TaskSnapshot, UserNotice};
use crate::store::{StoreError, TaskStore};
use crate::types::{Task, TaskDraft, TaskFilter, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OpKind {
    Move,
    Create,
    Update,
    Delete,
    /// Delete that only touches the working list after the store agrees.
    ConfirmDelete,
    BulkReplace,
    Refetch,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    /// Nothing would change, so nothing was sent.
    Unchanged,
    UnknownTask,
    DuplicateId,
}

#[derive(Debug, Clone)]
enum RemoteOp {
    Move { id: TaskId, status: TaskStatus },
    Create { provisional: TaskId, draft: TaskDraft },
    Update { task: Task },
    Delete { id: TaskId },
    ConfirmDelete { id: TaskId },
    BulkReplace { tasks: Vec<Task> },
    Refetch { generation: u64, filter: TaskFilter },
}

impl RemoteOp {
    fn kind(&self) -> OpKind {
        match self {
            Self::Move { .. } => OpKind::Move,
            Self::Create { .. } => OpKind::Create,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
            Self::ConfirmDelete { .. } => OpKind::ConfirmDelete,
            Self::BulkReplace { .. } => OpKind::BulkReplace,
            Self::Refetch { .. } => OpKind::Refetch,
        }
    }

    fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Move { id, .. } | Self::Delete { id } | Self::ConfirmDelete { id } => Some(id),
            Self::Create { provisional, .. } => Some(provisional),
            Self::Update { task } => Some(&task.id),
            Self::BulkReplace { .. } | Self::Refetch { .. } => None,
        }
    }

    /// Points a queued op at the id the store assigned on create.
    fn retarget(&mut self, new_id: &TaskId) {
        match self {
            Self::Move { id, .. } | Self::Delete { id } | Self::ConfirmDelete { id } => {
                *id = new_id.clone();
            }
            Self::Update { task } => task.id = new_id.clone(),
            Self::Create { .. } | Self::BulkReplace { .. } | Self::Refetch { .. } => {}
        }
    }

    async fn execute(self, store: &dyn TaskStore) -> Completion {
        let kind = self.kind();
        let task_id = self.task_id().cloned();
        let mut generation = 0;
        let result = match self {
            Self::Move { id, status } => store.move_task(&id, status).await.map(|()| RemoteValue::Done),
            Self::Create { draft, .. } => store.create(&draft).await.map(RemoteValue::Created),
            Self::Update { task } => store.update(&task).await.map(RemoteValue::Updated),
            Self::Delete { id } | Self::ConfirmDelete { id } => {
                store.delete(&id).await.map(|()| RemoteValue::Done)
            }
            Self::BulkReplace { tasks } => {
                store.bulk_replace(&tasks).await.map(|()| RemoteValue::Done)
            }
            Self::Refetch {
                generation: issued,
                filter,
            } => {
                generation = issued;
                store.list(&filter).await.map(RemoteValue::Listed)
            }
        };

        Completion {
            kind,
            task_id,
            generation,
            result,
        }
    }
}

fn enqueue(queue: &mut VecDeque<RemoteOp>, op: RemoteOp) {
    match (&op, queue.back()) {
        (RemoteOp::Move { .. }, Some(RemoteOp::Move { .. })) => {
            queue.pop_back();
        }
        (RemoteOp::Delete { .. } | RemoteOp::ConfirmDelete { .. }, _) => queue.clear(),
        _ => {}
    }
    queue.push_back(op);
}

#[derive(Debug)]
enum RemoteValue {
    Done,
    Created(Task),
    Updated(Task),
    Listed(Vec<Task>),
}

/// Result of one background remote call.
#[derive(Debug)]
pub struct Completion {
    kind: OpKind,
    task_id: Option<TaskId>,
    generation: u64,
    result: Result<RemoteValue, StoreError>,
}

/// What reconciliation did with a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub kind: OpKind,
    pub task_id: Option<TaskId>,
    pub error: Option<StoreError>,
}

impl Settled {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct OptimisticCoordinator {
    store: Arc<dyn TaskStore>,
    presenter: Box<dyn Presenter>,
    tasks: TaskSnapshot,
    filter: TaskFilter,
    in_flight: HashMap<TaskId, VecDeque<RemoteOp>>,
    outstanding: usize,
    unsettled_mutations: usize,
    refetch_generation: u64,
    resync_after_settle: bool,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
}

impl OptimisticCoordinator {
    pub fn new(store: Arc<dyn TaskStore>, presenter: Box<dyn Presenter>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            store,
            presenter,
            tasks: Vec::new().into(),
            filter: TaskFilter::default(),
            in_flight: HashMap::new(),
            outstanding: 0,
            unsettled_mutations: 0,
            refetch_generation: 0,
            resync_after_settle: false,
            completions_tx,
            completions_rx,
        }
    }

    pub fn tasks(&self) -> &TaskSnapshot {
        &self.tasks
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    /// Remote calls issued but not yet reconciled.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_in_flight(&self, id: &TaskId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Calls for `id` waiting behind the in-flight one.
    pub fn queued_for(&self, id: &TaskId) -> usize {
        self.in_flight.get(id).map_or(0, VecDeque::len)
    }

    /// Fetches the authoritative list and replaces the working list with it.
    pub async fn load(&mut self) -> Result<(), StoreError> {
        // Anything already in flight is older than this answer.
        self.refetch_generation += 1;
        let tasks = self.store.list(&self.filter).await?;
        info!(task_count = tasks.len(), "task list loaded");
        self.replace(tasks);
        Ok(())
    }

    pub async fn load_filtered(&mut self, filter: TaskFilter) -> Result<(), StoreError> {
        self.filter = filter;
        self.load().await
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.filter = filter;
        self.refresh();
    }

    /// Re-fetches the authoritative list in the background.
    pub fn refresh(&mut self) {
        self.refetch_generation += 1;
        let op = RemoteOp::Refetch {
            generation: self.refetch_generation,
            filter: self.filter.clone(),
        };
        self.spawn(op);
    }

    pub fn apply_status_change(&mut self, id: &TaskId, status: TaskStatus) -> ApplyOutcome {
        let Some(current) = self.task(id) else {
            warn!(task_id = %id, "status change for task not in working list");
            return ApplyOutcome::UnknownTask;
        };
        if current.status == status {
            return ApplyOutcome::Unchanged;
        }

        let updated = current.with_status(status);
        debug!(task_id = %id, from = %current.status, to = %status, "optimistic status change");
        self.replace(replace_entry(&self.tasks, id, &updated));
        self.dispatch(RemoteOp::Move {
            id: id.clone(),
            status,
        });
        ApplyOutcome::Applied
    }

    /// Appends the draft under a provisional id and returns that id.
    pub fn apply_create(&mut self, draft: TaskDraft) -> TaskId {
        let provisional = TaskId::provisional();
        let mut next = self.tasks.to_vec();
        next.push(draft.clone().into_task(provisional.clone()));
        debug!(task_id = %provisional, "optimistic create");
        self.replace(next);
        self.dispatch(RemoteOp::Create {
            provisional: provisional.clone(),
            draft,
        });
        provisional
    }

    pub fn apply_edit(&mut self, task: Task) -> ApplyOutcome {
        let Some(current) = self.task(&task.id) else {
            warn!(task_id = %task.id, "edit for task not in working list");
            return ApplyOutcome::UnknownTask;
        };
        if current == &task {
            return ApplyOutcome::Unchanged;
        }

        debug!(task_id = %task.id, "optimistic edit");
        self.replace(replace_entry(&self.tasks, &task.id, &task));
        self.dispatch(RemoteOp::Update { task });
        ApplyOutcome::Applied
    }

    pub fn apply_delete(&mut self, id: &TaskId) -> ApplyOutcome {
        if self.task(id).is_none() {
            warn!(task_id = %id, "delete for task not in working list");
            return ApplyOutcome::UnknownTask;
        }

        debug!(task_id = %id, "optimistic delete");
        let next = self
            .tasks
            .iter()
            .filter(|task| &task.id != id)
            .cloned()
            .collect();
        self.replace(next);
        self.dispatch(RemoteOp::Delete { id: id.clone() });
        ApplyOutcome::Applied
    }

    /// Issues a delete and only removes the task once the store confirms.
    pub fn confirm_delete(&mut self, id: &TaskId) -> ApplyOutcome {
        if self.task(id).is_none() {
            warn!(task_id = %id, "confirmed delete for task not in working list");
            return ApplyOutcome::UnknownTask;
        }
        self.dispatch(RemoteOp::ConfirmDelete { id: id.clone() });
        ApplyOutcome::Applied
    }

    pub fn apply_bulk_replace(&mut self, tasks: Vec<Task>) -> ApplyOutcome {
        let mut seen = HashSet::new();
        if let Some(duplicate) = tasks.iter().find(|task| !seen.insert(&task.id)) {
            warn!(task_id = %duplicate.id, "bulk replace with duplicate id rejected");
            return ApplyOutcome::DuplicateId;
        }

        debug!(task_count = tasks.len(), "optimistic bulk replace");
        self.replace(tasks.clone());
        self.dispatch(RemoteOp::BulkReplace { tasks });
        ApplyOutcome::Applied
    }

    pub fn try_next_completion(&mut self) -> Option<Completion> {
        self.completions_rx.try_recv().ok()
    }

    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions_rx.recv().await
    }

    /// Waits for and reconciles every outstanding call, including any
    /// refetches reconciliation itself triggers.
    pub async fn run_until_idle(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while self.outstanding > 0 {
            let Some(completion) = self.completions_rx.recv().await else {
                break;
            };
            settled.extend(self.handle_completion(completion));
        }
        settled
    }

    /// Reconciles one completion. Returns `None` for superseded refetches.
    pub fn handle_completion(&mut self, completion: Completion) -> Option<Settled> {
        self.outstanding = self.outstanding.saturating_sub(1);
        let Completion {
            kind,
            task_id,
            generation,
            result,
        } = completion;

        if kind == OpKind::Refetch {
            return self.settle_refetch(generation, result);
        }

        self.unsettled_mutations = self.unsettled_mutations.saturating_sub(1);
        let settled = match result {
            Ok(value) => {
                let task_id = self.confirm(kind, task_id, value);
                Settled {
                    kind,
                    task_id,
                    error: None,
                }
            }
            Err(error) => {
                self.roll_back(kind, task_id.as_ref(), &error);
                Settled {
                    kind,
                    task_id,
                    error: Some(error),
                }
            }
        };

        if self.resync_after_settle && self.unsettled_mutations == 0 {
            self.resync_after_settle = false;
            debug!("mutations settled after a rollback; resyncing");
            self.refresh();
        }

        Some(settled)
    }

    fn settle_refetch(
        &mut self,
        generation: u64,
        result: Result<RemoteValue, StoreError>,
    ) -> Option<Settled> {
        if generation != self.refetch_generation {
            debug!(generation, latest = self.refetch_generation, "ignoring superseded refetch");
            return None;
        }

        match result {
            Ok(RemoteValue::Listed(tasks)) => {
                debug!(task_count = tasks.len(), "working list reconciled from store");
                if self.unsettled_mutations > 0 {
                    // The answer may predate calls still running.
                    self.resync_after_settle = true;
                }
                self.replace(tasks);
                Some(Settled {
                    kind: OpKind::Refetch,
                    task_id: None,
                    error: None,
                })
            }
            Ok(_) => None,
            Err(error) => {
                warn!(error = %error, "refetch failed; keeping current working list");
                self.report(&error);
                Some(Settled {
                    kind: OpKind::Refetch,
                    task_id: None,
                    error: Some(error),
                })
            }
        }
    }

    /// Applies a successful result and releases the next queued call.
    /// Returns the id the task is now known by.
    fn confirm(
        &mut self,
        kind: OpKind,
        task_id: Option<TaskId>,
        value: RemoteValue,
    ) -> Option<TaskId> {
        let id = task_id?;
        debug!(task_id = %id, ?kind, "remote call confirmed");

        let id = match (kind, value) {
            (OpKind::Create, RemoteValue::Created(created)) => {
                let assigned = created.id.clone();
                if let Some(local) = self.task(&id) {
                    // Queued local changes are newer than the store's copy.
                    let entry = if self.queued_for(&id) == 0 {
                        created
                    } else {
                        Task {
                            id: assigned.clone(),
                            ..local.clone()
                        }
                    };
                    self.replace(replace_entry(&self.tasks, &id, &entry));
                }
                if let Some(mut queue) = self.in_flight.remove(&id) {
                    for op in &mut queue {
                        op.retarget(&assigned);
                    }
                    self.in_flight.insert(assigned.clone(), queue);
                }
                assigned
            }
            (OpKind::Update, RemoteValue::Updated(updated)) => {
                // A queued local edit is newer than this answer.
                if self.queued_for(&id) == 0 && self.task(&id).is_some() {
                    self.replace(replace_entry(&self.tasks, &id, &updated));
                }
                id
            }
            (OpKind::ConfirmDelete, _) => {
                let next = self
                    .tasks
                    .iter()
                    .filter(|task| task.id != id)
                    .cloned()
                    .collect();
                self.replace(next);
                // Nothing queued behind the delete has a task to act on.
                if let Some(queue) = self.in_flight.remove(&id)
                    && !queue.is_empty()
                {
                    debug!(task_id = %id, dropped = queue.len(), "dropped calls queued behind a confirmed delete");
                }
                return Some(id);
            }
            _ => id,
        };

        self.advance(&id);
        Some(id)
    }

    fn roll_back(&mut self, kind: OpKind, task_id: Option<&TaskId>, error: &StoreError) {
        warn!(?kind, task_id = ?task_id, error = %error, "remote call failed");
        let dropped = task_id
            .and_then(|id| self.in_flight.remove(id))
            .map_or(0, |queue| queue.len());
        if dropped > 0 {
            debug!(dropped, "dropped queued calls after failure");
        }

        self.report(error);

        // A confirmed delete changed nothing locally, so there is nothing to
        // undo unless queued optimistic calls were dropped.
        if kind != OpKind::ConfirmDelete || dropped > 0 {
            self.refresh();
        }
    }

    fn advance(&mut self, id: &TaskId) {
        let next = self.in_flight.get_mut(id).and_then(VecDeque::pop_front);
        match next {
            Some(op) => self.spawn(op),
            None => {
                self.in_flight.remove(id);
            }
        }
    }

    fn dispatch(&mut self, op: RemoteOp) {
        let Some(id) = op.task_id().cloned() else {
            self.spawn(op);
            return;
        };

        match self.in_flight.get_mut(&id) {
            Some(queue) => {
                debug!(task_id = %id, kind = ?op.kind(), "call queued behind in-flight call");
                enqueue(queue, op);
            }
            None => {
                self.in_flight.insert(id, VecDeque::new());
                self.spawn(op);
            }
        }
    }

    fn spawn(&mut self, op: RemoteOp) {
        self.outstanding += 1;
        if op.kind() != OpKind::Refetch {
            self.unsettled_mutations += 1;
        }
        debug!(kind = ?op.kind(), task_id = ?op.task_id(), "issuing remote call");

        let store = Arc::clone(&self.store);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = op.execute(store.as_ref()).await;
            // The receiver lives as long as the coordinator.
            let _ = tx.send(completion);
        });
    }

    fn replace(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into();
        self.presenter.present(&self.tasks);
    }

    fn report(&mut self, error: &StoreError) {
        let notice = UserNotice {
            kind: error.kind(),
            message: error.to_string(),
        };
        self.presenter.notify(&notice);
    }
}

fn replace_entry(tasks: &[Task], id: &TaskId, updated: &Task) -> Vec<Task> {
    tasks
        .iter()
        .map(|task| {
            if &task.id == id {
                updated.clone()
            } else {
                task.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::present::RecordingPresenter;
    use crate::store::memory::{StoreCall, StoreOp};
    use crate::store::{FailureKind, MemoryTaskStore};

    fn seed() -> Vec<Task> {
        vec![
            Task::new("t1", "Plan", TaskStatus::Todo),
            Task::new("t2", "Build", TaskStatus::InProgress),
            Task::new("t3", "Ship", TaskStatus::Done),
        ]
    }

    async fn loaded() -> (OptimisticCoordinator, Arc<MemoryTaskStore>, RecordingPresenter) {
        let store = Arc::new(MemoryTaskStore::with_tasks(seed()));
        let presenter = RecordingPresenter::new();
        let mut coordinator = OptimisticCoordinator::new(store.clone(), Box::new(presenter.clone()));
        coordinator.load().await.unwrap();
        (coordinator, store, presenter)
    }

    fn status_of(coordinator: &OptimisticCoordinator, id: &str) -> Option<TaskStatus> {
        coordinator.task(&TaskId::from(id)).map(|task| task.status)
    }

    #[tokio::test]
    async fn status_change_is_visible_before_remote_confirms() {
        let (mut coordinator, store, presenter) = loaded().await;
        let before = presenter.present_count();

        let outcome = coordinator.apply_status_change(&TaskId::from("t1"), TaskStatus::InProgress);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(status_of(&coordinator, "t1"), Some(TaskStatus::InProgress));
        assert_eq!(presenter.present_count(), before + 1);
        assert_eq!(coordinator.outstanding(), 1);

        let ids: Vec<&str> = coordinator.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);

        let settled = coordinator.run_until_idle().await;
        assert_eq!(settled.len(), 1);
        assert!(settled[0].succeeded());
        assert_eq!(store.count_calls(StoreOp::Move), 1);
        assert_eq!(store.tasks()[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn same_status_is_unchanged_and_sends_nothing() {
        let (mut coordinator, store, _) = loaded().await;
        assert_eq!(
            coordinator.apply_status_change(&TaskId::from("t1"), TaskStatus::Todo),
            ApplyOutcome::Unchanged
        );
        assert_eq!(coordinator.outstanding(), 0);
        assert_eq!(store.count_calls(StoreOp::Move), 0);
    }

    #[tokio::test]
    async fn failed_move_rolls_back_to_authoritative_list() {
        let (mut coordinator, store, presenter) = loaded().await;
        store.fail_next(StoreOp::Move, StoreError::Unavailable("offline".to_string()));

        coordinator.apply_status_change(&TaskId::from("t1"), TaskStatus::Done);
        // Someone else changed t2 meanwhile.
        let mut remote = seed();
        remote[1].status = TaskStatus::Done;
        store.set_tasks(remote.clone());

        let settled = coordinator.run_until_idle().await;
        assert_eq!(settled[0].error, Some(StoreError::Unavailable("offline".to_string())));
        assert_eq!(coordinator.tasks().to_vec(), remote);
        assert_eq!(
            presenter.notices()[0].kind,
            FailureKind::RemoteUnavailable
        );
    }

    #[tokio::test]
    async fn rejected_move_is_reported_as_rejection() {
        let (mut coordinator, store, presenter) = loaded().await;
        store.fail_next(StoreOp::Move, StoreError::NotFound(TaskId::from("t1")));
        coordinator.apply_status_change(&TaskId::from("t1"), TaskStatus::Done);
        coordinator.run_until_idle().await;

        assert_eq!(presenter.notices()[0].kind, FailureKind::RemoteRejected);
        assert_eq!(status_of(&coordinator, "t1"), Some(TaskStatus::Todo));
    }

    #[tokio::test]
    async fn second_move_for_same_task_waits_for_first() {
        let (mut coordinator, store, _) = loaded().await;
        let id = TaskId::from("t1");

        coordinator.apply_status_change(&id, TaskStatus::InProgress);
        coordinator.apply_status_change(&id, TaskStatus::Done);
        assert_eq!(status_of(&coordinator, "t1"), Some(TaskStatus::Done));
        assert!(coordinator.is_in_flight(&id));
        assert_eq!(coordinator.queued_for(&id), 1);
        assert_eq!(coordinator.outstanding(), 1);

        coordinator.run_until_idle().await;
        assert!(!coordinator.is_in_flight(&id));
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::List(TaskFilter::default()),
                StoreCall::Move(id.clone(), TaskStatus::InProgress),
                StoreCall::Move(id, TaskStatus::Done),
            ]
        );
        assert_eq!(store.tasks()[0].status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn queued_moves_coalesce_to_latest() {
        let (mut coordinator, store, _) = loaded().await;
        let id = TaskId::from("t1");

        coordinator.apply_status_change(&id, TaskStatus::InProgress);
        coordinator.apply_status_change(&id, TaskStatus::Done);
        coordinator.apply_status_change(&id, TaskStatus::Todo);
        assert_eq!(coordinator.queued_for(&id), 1);

        coordinator.run_until_idle().await;
        assert_eq!(store.count_calls(StoreOp::Move), 2);
        assert_eq!(store.tasks()[0].status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn failure_drops_queued_calls_for_that_task() {
        let (mut coordinator, store, _) = loaded().await;
        let id = TaskId::from("t1");
        store.fail_next(StoreOp::Move, StoreError::Unavailable("offline".to_string()));

        coordinator.apply_status_change(&id, TaskStatus::InProgress);
        coordinator.apply_status_change(&id, TaskStatus::Done);
        coordinator.run_until_idle().await;

        assert_eq!(store.count_calls(StoreOp::Move), 1);
        assert_eq!(status_of(&coordinator, "t1"), Some(TaskStatus::Todo));
    }

    #[tokio::test]
    async fn create_swaps_provisional_id_for_assigned_one() {
        let (mut coordinator, store, _) = loaded().await;
        let provisional = coordinator.apply_create(TaskDraft::new("Review"));
        assert!(coordinator.task(&provisional).is_some());
        assert_eq!(coordinator.tasks().len(), 4);

        // Dragged before the store answered.
        coordinator.apply_status_change(&provisional, TaskStatus::Done);
        coordinator.run_until_idle().await;

        assert!(coordinator.task(&provisional).is_none());
        let created = coordinator
            .tasks()
            .iter()
            .find(|task| task.title == "Review")
            .cloned()
            .unwrap();
        assert!(!created.id.is_provisional());
        assert_eq!(created.status, TaskStatus::Done);
        assert!(store.calls().contains(&StoreCall::Move(created.id.clone(), TaskStatus::Done)));
        assert_eq!(store.tasks().len(), 4);
    }

    #[tokio::test]
    async fn failed_create_disappears_after_refetch() {
        let (mut coordinator, store, presenter) = loaded().await;
        store.fail_next(StoreOp::Create, StoreError::Validation("title".to_string()));
        coordinator.apply_create(TaskDraft::new("Bad"));
        coordinator.run_until_idle().await;

        assert_eq!(coordinator.tasks().len(), 3);
        assert_eq!(presenter.notices()[0].kind, FailureKind::RemoteRejected);
    }

    #[tokio::test]
    async fn edit_and_delete_are_optimistic() {
        let (mut coordinator, store, _) = loaded().await;
        let mut edited = coordinator.task(&TaskId::from("t2")).cloned().unwrap();
        edited.title = "Build it".to_string();

        assert_eq!(coordinator.apply_edit(edited.clone()), ApplyOutcome::Applied);
        assert_eq!(coordinator.apply_edit(edited.clone()), ApplyOutcome::Unchanged);
        assert_eq!(coordinator.apply_delete(&TaskId::from("t3")), ApplyOutcome::Applied);
        assert_eq!(coordinator.tasks().len(), 2);

        coordinator.run_until_idle().await;
        assert_eq!(store.tasks().len(), 2);
        assert_eq!(store.tasks()[1].title, "Build it");
    }

    #[tokio::test]
    async fn failed_delete_restores_task() {
        let (mut coordinator, store, _) = loaded().await;
        store.fail_next(StoreOp::Delete, StoreError::Unavailable("offline".to_string()));
        coordinator.apply_delete(&TaskId::from("t3"));
        assert_eq!(coordinator.tasks().len(), 2);

        coordinator.run_until_idle().await;
        assert_eq!(coordinator.tasks().len(), 3);
    }

    #[tokio::test]
    async fn confirmed_delete_waits_for_store() {
        let (mut coordinator, _, _) = loaded().await;
        let id = TaskId::from("t3");
        assert_eq!(coordinator.confirm_delete(&id), ApplyOutcome::Applied);
        assert!(coordinator.task(&id).is_some());

        let settled = coordinator.run_until_idle().await;
        assert_eq!(settled[0].kind, OpKind::ConfirmDelete);
        assert!(settled[0].succeeded());
        assert!(coordinator.task(&id).is_none());
    }

    #[tokio::test]
    async fn failed_confirmed_delete_keeps_task_without_refetch() {
        let (mut coordinator, store, presenter) = loaded().await;
        store.fail_next(StoreOp::Delete, StoreError::Unavailable("offline".to_string()));
        coordinator.confirm_delete(&TaskId::from("t3"));

        let settled = coordinator.run_until_idle().await;
        assert_eq!(settled.len(), 1);
        assert!(!settled[0].succeeded());
        assert_eq!(coordinator.tasks().len(), 3);
        assert_eq!(store.count_calls(StoreOp::List), 1);
        assert_eq!(presenter.notices().len(), 1);
    }

    #[tokio::test]
    async fn bulk_replace_rejects_duplicate_ids_locally() {
        let (mut coordinator, store, _) = loaded().await;
        let duplicate = vec![
            Task::new("x", "One", TaskStatus::Todo),
            Task::new("x", "Two", TaskStatus::Todo),
        ];
        assert_eq!(
            coordinator.apply_bulk_replace(duplicate),
            ApplyOutcome::DuplicateId
        );
        assert_eq!(coordinator.tasks().len(), 3);

        let replacement = vec![Task::new("y", "Only", TaskStatus::Done)];
        assert_eq!(
            coordinator.apply_bulk_replace(replacement.clone()),
            ApplyOutcome::Applied
        );
        coordinator.run_until_idle().await;
        assert_eq!(store.tasks(), replacement);
    }

    #[tokio::test]
    async fn unknown_task_is_not_sent() {
        let (mut coordinator, store, _) = loaded().await;
        let ghost = TaskId::from("ghost");
        assert_eq!(
            coordinator.apply_status_change(&ghost, TaskStatus::Done),
            ApplyOutcome::UnknownTask
        );
        assert_eq!(coordinator.apply_delete(&ghost), ApplyOutcome::UnknownTask);
        assert_eq!(coordinator.confirm_delete(&ghost), ApplyOutcome::UnknownTask);
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn superseded_refetch_is_ignored() {
        let (mut coordinator, store, _) = loaded().await;
        coordinator.refresh();
        store.set_tasks(vec![Task::new("only", "Only", TaskStatus::Todo)]);
        coordinator.refresh();

        let settled = coordinator.run_until_idle().await;
        assert_eq!(settled.len(), 1);
        assert_eq!(coordinator.tasks().len(), 1);
    }

    #[tokio::test]
    async fn filter_change_refetches_with_filter() {
        let (mut coordinator, store, _) = loaded().await;
        let filter = TaskFilter::new().with_status(TaskStatus::Done);
        coordinator.set_filter(filter.clone());
        coordinator.run_until_idle().await;

        assert_eq!(coordinator.tasks().len(), 1);
        assert_eq!(store.calls().last(), Some(&StoreCall::List(filter)));
    }
}
