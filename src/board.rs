//! Top-level owner of the working task list.
//!
//! The board wires the pieces together: drag input flows through the
//! [`DragSession`], resolved drops become optimistic status changes on the
//! [`OptimisticCoordinator`], delete clicks go through the [`ArmingTable`],
//! and change notifications from other components trigger a refetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::arming::{ArmAction, ArmState, ArmingTable, DEFAULT_ARM_WINDOW};
use crate::coordinator::{ApplyOutcome, Completion, OpKind, OptimisticCoordinator, Settled};
use crate::drag::{DragEvent, DragInput, DragSession, DragState, DropOutcome, SensorConfig, resolve_drop};
use crate::events::{ChangeChannel, Subscription, TaskChange};
use crate::geometry::{DropZoneMap, DroppableId};
use crate::present::{self, Presenter, TaskSnapshot};
use crate::settings::Settings;
use crate::store::{StoreError, TaskStore};
use crate::types::{Task, TaskDraft, TaskFilter, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardConfig {
    pub sensors: SensorConfig,
    pub arm_window: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            sensors: SensorConfig::default(),
            arm_window: DEFAULT_ARM_WINDOW,
        }
    }
}

impl From<&Settings> for BoardConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            sensors: settings.sensor_config(),
            arm_window: settings.arm_window(),
        }
    }
}

/// What one turn of [`Board::step`] handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    Settled(Settled),
    /// A completion that no longer mattered, such as an outdated refetch.
    Superseded,
    Changed(TaskChange),
    Disarmed(Vec<TaskId>),
    /// Nothing left that could ever wake the board.
    Idle,
}

pub struct Board {
    coordinator: OptimisticCoordinator,
    drag: DragSession,
    zones: DropZoneMap,
    arming: ArmingTable,
    changes: ChangeChannel,
    subscription: Option<Subscription>,
}

impl Board {
    /// Creates the board and subscribes it to `changes`.
    pub fn new(
        store: Arc<dyn TaskStore>,
        presenter: Box<dyn Presenter>,
        changes: ChangeChannel,
        config: BoardConfig,
    ) -> Self {
        let subscription = Some(changes.subscribe());
        Self {
            coordinator: OptimisticCoordinator::new(store, presenter),
            drag: DragSession::new(config.sensors),
            zones: DropZoneMap::default(),
            arming: ArmingTable::new(config.arm_window),
            changes,
            subscription,
        }
    }

    /// Initial fetch of the authoritative list.
    pub async fn mount(&mut self) -> Result<(), StoreError> {
        self.coordinator.load().await?;
        info!(task_count = self.tasks().len(), "board mounted");
        Ok(())
    }

    pub async fn mount_filtered(&mut self, filter: TaskFilter) -> Result<(), StoreError> {
        self.coordinator.load_filtered(filter).await?;
        info!(task_count = self.tasks().len(), "board mounted with filter");
        Ok(())
    }

    /// Drops the change subscription and every per-card transient state.
    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.drag.handle(DragInput::Cancel, &[], &self.zones);
        self.drag.settle();
        self.arming.retain_mounted(std::iter::empty::<&TaskId>());
        self.zones.clear();
        info!("board unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn tasks(&self) -> &TaskSnapshot {
        self.coordinator.tasks()
    }

    pub fn coordinator(&self) -> &OptimisticCoordinator {
        &self.coordinator
    }

    pub fn changes(&self) -> &ChangeChannel {
        &self.changes
    }

    pub fn zones(&self) -> &DropZoneMap {
        &self.zones
    }

    /// Live rectangles, refreshed by the presentation layer after layout.
    pub fn zones_mut(&mut self) -> &mut DropZoneMap {
        &mut self.zones
    }

    pub fn drag_state(&self) -> &DragState {
        self.drag.state()
    }

    pub fn arm_state(&self, id: &TaskId) -> ArmState {
        self.arming.state(id)
    }

    pub fn columns(&self) -> [(TaskStatus, Vec<&Task>); 3] {
        present::columns(self.tasks())
    }

    pub fn counts(&self) -> [(TaskStatus, usize); 3] {
        present::counts(self.tasks())
    }

    pub fn drag_input(&mut self, input: DragInput) -> DragEvent {
        let event = self.drag.handle(input, self.coordinator.tasks(), &self.zones);
        if let DragEvent::Dropped(DropOutcome::Move { task_id, to, .. }) = &event {
            self.coordinator.apply_status_change(task_id, *to);
            self.drag.settle();
        }
        event
    }

    /// Moves a task without a gesture, through the same drop resolution.
    pub fn move_task(&mut self, id: &TaskId, status: TaskStatus) -> DropOutcome {
        let target = DroppableId::Column(status);
        let outcome = resolve_drop(id, Some(&target), self.coordinator.tasks());
        if let DropOutcome::Move { task_id, to, .. } = &outcome {
            self.coordinator.apply_status_change(task_id, *to);
        }
        outcome
    }

    pub fn create(&mut self, draft: TaskDraft) -> TaskId {
        self.coordinator.apply_create(draft)
    }

    pub fn edit(&mut self, task: Task) -> ApplyOutcome {
        self.coordinator.apply_edit(task)
    }

    /// Optimistic delete with no confirmation step.
    pub fn delete(&mut self, id: &TaskId) -> ApplyOutcome {
        self.coordinator.apply_delete(id)
    }

    pub fn bulk_replace(&mut self, tasks: Vec<Task>) -> ApplyOutcome {
        self.coordinator.apply_bulk_replace(tasks)
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.coordinator.set_filter(filter);
    }

    pub fn refresh(&mut self) {
        self.coordinator.refresh();
    }

    /// Delete button pressed on a card. The second press inside the arm
    /// window issues the delete.
    pub fn activate_delete(&mut self, id: &TaskId, now: Instant) -> ArmAction {
        if self.coordinator.task(id).is_none() {
            warn!(task_id = %id, "delete activation for task not in working list");
            return ArmAction::Ignored;
        }

        let action = self.arming.activate(id, now);
        if action == ArmAction::Confirm
            && self.coordinator.confirm_delete(id) != ApplyOutcome::Applied
        {
            self.arming.settle(id, false);
        }
        action
    }

    /// Disarms expired delete arms.
    pub fn tick(&mut self, now: Instant) -> Vec<TaskId> {
        self.arming.tick(now)
    }

    pub fn handle_completion(&mut self, completion: Completion) -> Option<Settled> {
        let settled = self.coordinator.handle_completion(completion)?;

        if settled.kind == OpKind::ConfirmDelete
            && let Some(id) = &settled.task_id
        {
            self.arming.settle(id, settled.succeeded());
            if settled.succeeded() {
                self.zones.remove(&DroppableId::Card(id.clone()));
                self.changes.publish(TaskChange::Deleted(id.clone()));
            }
        }

        let present = self.coordinator.tasks().clone();
        self.arming.retain_mounted(present.iter().map(|task| &task.id));
        Some(settled)
    }

    pub fn handle_change(&mut self, change: &TaskChange) {
        if let TaskChange::Deleted(id) = change
            && self.coordinator.task(id).is_none()
        {
            debug!(task_id = %id, "deleted task already gone; no refetch");
            return;
        }
        debug!(?change, "task changed elsewhere; refetching");
        self.coordinator.refresh();
    }

    /// Handles everything already waiting without blocking.
    pub fn pump(&mut self) -> Vec<BoardEvent> {
        let mut events = Vec::new();
        while let Some(completion) = self.coordinator.try_next_completion() {
            events.push(match self.handle_completion(completion) {
                Some(settled) => BoardEvent::Settled(settled),
                None => BoardEvent::Superseded,
            });
        }
        while let Some(change) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            self.handle_change(&change);
            events.push(BoardEvent::Changed(change));
        }
        events
    }

    /// Waits for the next completion, change notification or arm expiry and
    /// handles it.
    pub async fn step(&mut self) -> BoardEvent {
        let deadline = self.arming.next_deadline();
        tokio::select! {
            Some(completion) = self.coordinator.next_completion(), if self.coordinator.outstanding() > 0 => {
                match self.handle_completion(completion) {
                    Some(settled) => BoardEvent::Settled(settled),
                    None => BoardEvent::Superseded,
                }
            }
            Some(change) = next_change(&mut self.subscription) => {
                self.handle_change(&change);
                BoardEvent::Changed(change)
            }
            () = sleep_until(deadline), if deadline.is_some() => {
                BoardEvent::Disarmed(self.arming.tick(Instant::now()))
            }
            else => BoardEvent::Idle,
        }
    }

    /// Reconciles every outstanding call and queued change notification.
    pub async fn run_until_idle(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        loop {
            while let Some(change) = self.subscription.as_mut().and_then(Subscription::try_recv) {
                self.handle_change(&change);
            }
            if self.coordinator.outstanding() == 0 {
                break;
            }
            let Some(completion) = self.coordinator.next_completion().await else {
                break;
            };
            settled.extend(self.handle_completion(completion));
        }
        settled
    }
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<TaskChange> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => None,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}
