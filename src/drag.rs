//! Drag session state machine.
//!
//! One gesture at a time: `Idle -> Dragging -> Resolving -> Idle`. A pointer
//! press waits in `Pressed` until it travels the activation distance, so a
//! plain click never starts a drag. Hover targets computed while dragging are
//! advisory; only the drop produces a [`DropOutcome`].

use tracing::{debug, warn};

use crate::geometry::{DropZoneMap, DroppableId, Point, Rect};
use crate::types::{Task, TaskId, TaskStatus};

pub const DEFAULT_ACTIVATION_DISTANCE: f64 = 8.0;
pub const DEFAULT_KEYBOARD_STEP: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConfig {
    /// Pointer travel, in pixels, before a press becomes a drag.
    pub activation_distance: f64,
    /// Pixels moved per arrow key during a keyboard drag.
    pub keyboard_step: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            activation_distance: DEFAULT_ACTIVATION_DISTANCE,
            keyboard_step: DEFAULT_KEYBOARD_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyDirection {
    Up,
    Down,
    Left,
    Right,
}

impl KeyDirection {
    fn offset(self, step: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -step),
            Self::Down => (0.0, step),
            Self::Left => (-step, 0.0),
            Self::Right => (step, 0.0),
        }
    }
}

/// Raw input forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DragInput {
    /// Pointer pressed on a card whose current rectangle is `rect`.
    PointerDown {
        item: TaskId,
        position: Point,
        rect: Rect,
    },
    PointerMove {
        position: Point,
    },
    PointerUp,
    KeyboardPickUp {
        item: TaskId,
        rect: Rect,
    },
    KeyboardMove(KeyDirection),
    KeyboardDrop,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sensor {
    Pointer { origin: Point },
    Keyboard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerPress {
    pub item: TaskId,
    pub origin: Point,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDrag {
    pub item_id: TaskId,
    /// Copy of the task taken at activation, used for the drag overlay.
    pub snapshot: Task,
    pub sensor: Sensor,
    pub initial_rect: Rect,
    pub current_rect: Rect,
    pub over: Option<DroppableId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Pressed(PointerPress),
    Dragging(ActiveDrag),
    Resolving(ActiveDrag),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NoOpReason {
    /// Released over nothing recognisable.
    NoTarget,
    /// Target column equals the task's current status.
    SameColumn,
    /// The dragged id is not in the working list.
    UnknownItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    Move {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    NoOp(NoOpReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragEvent {
    None,
    Started { item: TaskId },
    Hover { over: Option<DroppableId> },
    Dropped(DropOutcome),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct DragSession {
    state: DragState,
    config: SensorConfig,
}

impl DragSession {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            state: DragState::Idle,
            config,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    /// True when no drag is active; a pending press still counts as idle.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DragState::Idle | DragState::Pressed(_))
    }

    pub fn active(&self) -> Option<&ActiveDrag> {
        match &self.state {
            DragState::Dragging(active) | DragState::Resolving(active) => Some(active),
            _ => None,
        }
    }

    pub fn handle(&mut self, input: DragInput, tasks: &[Task], zones: &DropZoneMap) -> DragEvent {
        let state = std::mem::take(&mut self.state);
        let (next, event) = match (state, input) {
            (DragState::Resolving(active), input) => {
                debug!(item = %active.item_id, ?input, "input ignored while resolving");
                (DragState::Resolving(active), DragEvent::None)
            }

            (DragState::Dragging(active), DragInput::PointerDown { .. })
                if active.sensor == Sensor::Keyboard =>
            {
                debug!(item = %active.item_id, "pointer press ignored during keyboard drag");
                (DragState::Dragging(active), DragEvent::None)
            }

            (_, DragInput::PointerDown { item, position, rect }) => {
                if find_task(tasks, &item).is_none() {
                    warn!(item = %item, "pointer down on unknown task; staying idle");
                    (DragState::Idle, DragEvent::None)
                } else {
                    let press = PointerPress {
                        item,
                        origin: position,
                        rect,
                    };
                    (DragState::Pressed(press), DragEvent::None)
                }
            }

            (_, DragInput::KeyboardPickUp { item, rect }) => {
                match activate(item, Sensor::Keyboard, rect, tasks, zones) {
                    Some(active) => {
                        let event = DragEvent::Started {
                            item: active.item_id.clone(),
                        };
                        (DragState::Dragging(active), event)
                    }
                    None => (DragState::Idle, DragEvent::None),
                }
            }

            (DragState::Pressed(press), DragInput::PointerMove { position }) => {
                if press.origin.distance_to(position) < self.config.activation_distance {
                    (DragState::Pressed(press), DragEvent::None)
                } else {
                    let sensor = Sensor::Pointer {
                        origin: press.origin,
                    };
                    match activate(press.item, sensor, press.rect, tasks, zones) {
                        Some(mut active) => {
                            let item = active.item_id.clone();
                            track_pointer(&mut active, position, zones);
                            (DragState::Dragging(active), DragEvent::Started { item })
                        }
                        None => (DragState::Idle, DragEvent::None),
                    }
                }
            }

            (DragState::Pressed(_), DragInput::PointerUp | DragInput::Cancel) => {
                (DragState::Idle, DragEvent::None)
            }

            (DragState::Dragging(mut active), DragInput::PointerMove { position })
                if matches!(active.sensor, Sensor::Pointer { .. }) =>
            {
                track_pointer(&mut active, position, zones);
                let over = active.over.clone();
                (DragState::Dragging(active), DragEvent::Hover { over })
            }

            (DragState::Dragging(mut active), DragInput::KeyboardMove(direction))
                if active.sensor == Sensor::Keyboard =>
            {
                let (dx, dy) = direction.offset(self.config.keyboard_step);
                active.current_rect = active.current_rect.translated(dx, dy);
                active.over = zones.resolve(active.current_rect);
                let over = active.over.clone();
                (DragState::Dragging(active), DragEvent::Hover { over })
            }

            (DragState::Dragging(mut active), DragInput::PointerUp)
                if matches!(active.sensor, Sensor::Pointer { .. }) =>
            {
                active.over = zones.resolve(active.current_rect);
                let outcome = resolve_drop(&active.item_id, active.over.as_ref(), tasks);
                self.finish(active, outcome)
            }

            (DragState::Dragging(mut active), DragInput::KeyboardDrop)
                if active.sensor == Sensor::Keyboard =>
            {
                active.over = zones.resolve(active.current_rect);
                let outcome = resolve_drop(&active.item_id, active.over.as_ref(), tasks);
                self.finish(active, outcome)
            }

            (DragState::Dragging(active), DragInput::Cancel) => {
                debug!(item = %active.item_id, "drag cancelled");
                (DragState::Idle, DragEvent::Cancelled)
            }

            (state, _) => (state, DragEvent::None),
        };

        self.state = next;
        event
    }

    /// Returns to idle once the dropped move has been applied locally.
    pub fn settle(&mut self) {
        if let DragState::Resolving(active) = &self.state {
            debug!(item = %active.item_id, "drag settled");
            self.state = DragState::Idle;
        }
    }

    fn finish(&self, active: ActiveDrag, outcome: DropOutcome) -> (DragState, DragEvent) {
        match &outcome {
            DropOutcome::Move { task_id, from, to } => {
                debug!(task_id = %task_id, %from, %to, "drop resolved to move");
                (DragState::Resolving(active), DragEvent::Dropped(outcome))
            }
            DropOutcome::NoOp(reason) => {
                debug!(item = %active.item_id, ?reason, "drop resolved to no-op");
                (DragState::Idle, DragEvent::Dropped(outcome))
            }
        }
    }
}

/// Maps a release target onto a status change for `item`.
///
/// A card target means "that card's column"; its position within the column
/// is irrelevant.
pub fn resolve_drop(item: &TaskId, over: Option<&DroppableId>, tasks: &[Task]) -> DropOutcome {
    let Some(source) = find_task(tasks, item) else {
        warn!(item = %item, "dropped task is not in the working list");
        return DropOutcome::NoOp(NoOpReason::UnknownItem);
    };

    let target = match over {
        Some(DroppableId::Column(status)) => *status,
        Some(DroppableId::Card(card_id)) => match find_task(tasks, card_id) {
            Some(card) => card.status,
            None => return DropOutcome::NoOp(NoOpReason::NoTarget),
        },
        None => return DropOutcome::NoOp(NoOpReason::NoTarget),
    };

    if target == source.status {
        return DropOutcome::NoOp(NoOpReason::SameColumn);
    }

    DropOutcome::Move {
        task_id: source.id.clone(),
        from: source.status,
        to: target,
    }
}

fn find_task<'a>(tasks: &'a [Task], id: &TaskId) -> Option<&'a Task> {
    tasks.iter().find(|task| &task.id == id)
}

fn activate(
    item: TaskId,
    sensor: Sensor,
    rect: Rect,
    tasks: &[Task],
    zones: &DropZoneMap,
) -> Option<ActiveDrag> {
    let Some(task) = find_task(tasks, &item) else {
        warn!(item = %item, "drag start for unknown task; staying idle");
        return None;
    };
    debug!(item = %item, ?sensor, "drag started");
    Some(ActiveDrag {
        item_id: item,
        snapshot: task.clone(),
        sensor,
        initial_rect: rect,
        current_rect: rect,
        over: zones.resolve(rect),
    })
}

fn track_pointer(active: &mut ActiveDrag, position: Point, zones: &DropZoneMap) {
    if let Sensor::Pointer { origin } = active.sensor {
        active.current_rect = active
            .initial_rect
            .translated(position.x - origin.x, position.y - origin.y);
        active.over = zones.resolve(active.current_rect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks() -> Vec<Task> {
        vec![
            Task::new("t1", "Plan", TaskStatus::Todo),
            Task::new("t2", "Ship", TaskStatus::Done),
        ]
    }

    fn zones() -> DropZoneMap {
        let mut map = DropZoneMap::default();
        map.register_column(TaskStatus::Todo, Rect::new(0.0, 0.0, 300.0, 800.0));
        map.register_column(TaskStatus::InProgress, Rect::new(320.0, 0.0, 300.0, 800.0));
        map.register_column(TaskStatus::Done, Rect::new(640.0, 0.0, 300.0, 800.0));
        map.register_card(TaskId::from("t1"), Rect::new(10.0, 50.0, 280.0, 60.0));
        map.register_card(TaskId::from("t2"), Rect::new(650.0, 50.0, 280.0, 60.0));
        map
    }

    fn press_t1(session: &mut DragSession) {
        session.handle(
            DragInput::PointerDown {
                item: TaskId::from("t1"),
                position: Point::new(100.0, 80.0),
                rect: Rect::new(10.0, 50.0, 280.0, 60.0),
            },
            &tasks(),
            &zones(),
        );
    }

    #[test]
    fn small_pointer_movement_does_not_start_drag() {
        let mut session = DragSession::default();
        press_t1(&mut session);
        let event = session.handle(
            DragInput::PointerMove {
                position: Point::new(103.0, 82.0),
            },
            &tasks(),
            &zones(),
        );
        assert_eq!(event, DragEvent::None);
        assert!(session.is_idle());

        let event = session.handle(DragInput::PointerUp, &tasks(), &zones());
        assert_eq!(event, DragEvent::None);
        assert_eq!(session.state(), &DragState::Idle);
    }

    #[test]
    fn pointer_drag_into_empty_column_area_moves_task() {
        let mut session = DragSession::default();
        press_t1(&mut session);

        let event = session.handle(
            DragInput::PointerMove {
                position: Point::new(420.0, 600.0),
            },
            &tasks(),
            &zones(),
        );
        assert_eq!(
            event,
            DragEvent::Started {
                item: TaskId::from("t1")
            }
        );
        assert_eq!(session.active().map(|a| a.snapshot.title.as_str()), Some("Plan"));

        let event = session.handle(DragInput::PointerUp, &tasks(), &zones());
        assert_eq!(
            event,
            DragEvent::Dropped(DropOutcome::Move {
                task_id: TaskId::from("t1"),
                from: TaskStatus::Todo,
                to: TaskStatus::InProgress,
            })
        );
        assert!(matches!(session.state(), DragState::Resolving(_)));

        session.settle();
        assert_eq!(session.state(), &DragState::Idle);
    }

    #[test]
    fn hover_is_advisory_and_tracks_latest_move() {
        let mut session = DragSession::default();
        press_t1(&mut session);
        session.handle(
            DragInput::PointerMove {
                position: Point::new(130.0, 80.0),
            },
            &tasks(),
            &zones(),
        );
        let event = session.handle(
            DragInput::PointerMove {
                position: Point::new(780.0, 300.0),
            },
            &tasks(),
            &zones(),
        );
        assert_eq!(
            event,
            DragEvent::Hover {
                over: Some(DroppableId::Column(TaskStatus::Done))
            }
        );
    }

    #[test]
    fn drop_back_in_own_column_is_noop() {
        let mut session = DragSession::default();
        press_t1(&mut session);
        session.handle(
            DragInput::PointerMove {
                position: Point::new(100.0, 400.0),
            },
            &tasks(),
            &zones(),
        );
        let event = session.handle(DragInput::PointerUp, &tasks(), &zones());
        assert_eq!(event, DragEvent::Dropped(DropOutcome::NoOp(NoOpReason::SameColumn)));
        assert_eq!(session.state(), &DragState::Idle);
    }

    #[test]
    fn drop_outside_every_droppable_is_noop() {
        let mut session = DragSession::default();
        press_t1(&mut session);
        session.handle(
            DragInput::PointerMove {
                position: Point::new(400.0, 80.0),
            },
            &tasks(),
            &zones(),
        );
        let event = session.handle(DragInput::PointerUp, &tasks(), &DropZoneMap::default());
        assert_eq!(event, DragEvent::Dropped(DropOutcome::NoOp(NoOpReason::NoTarget)));
    }

    #[test]
    fn keyboard_drag_moves_in_discrete_steps() {
        let mut session = DragSession::default();
        let event = session.handle(
            DragInput::KeyboardPickUp {
                item: TaskId::from("t1"),
                rect: Rect::new(10.0, 50.0, 280.0, 60.0),
            },
            &tasks(),
            &zones(),
        );
        assert_eq!(
            event,
            DragEvent::Started {
                item: TaskId::from("t1")
            }
        );

        for _ in 0..13 {
            session.handle(DragInput::KeyboardMove(KeyDirection::Right), &tasks(), &zones());
        }
        let rect = session.active().map(|active| active.current_rect);
        assert_eq!(rect.map(|r| r.left), Some(10.0 + 13.0 * DEFAULT_KEYBOARD_STEP));

        let event = session.handle(DragInput::KeyboardDrop, &tasks(), &zones());
        assert_eq!(
            event,
            DragEvent::Dropped(DropOutcome::Move {
                task_id: TaskId::from("t1"),
                from: TaskStatus::Todo,
                to: TaskStatus::InProgress,
            })
        );
    }

    #[test]
    fn pointer_press_does_not_hijack_keyboard_drag() {
        let mut session = DragSession::default();
        session.handle(
            DragInput::KeyboardPickUp {
                item: TaskId::from("t1"),
                rect: Rect::new(10.0, 50.0, 280.0, 60.0),
            },
            &tasks(),
            &zones(),
        );

        let event = session.handle(
            DragInput::PointerDown {
                item: TaskId::from("t2"),
                position: Point::new(700.0, 80.0),
                rect: Rect::new(650.0, 50.0, 280.0, 60.0),
            },
            &tasks(),
            &zones(),
        );

        assert_eq!(event, DragEvent::None);
        let active = session.active().map(|active| (active.item_id.clone(), active.sensor));
        assert_eq!(active, Some((TaskId::from("t1"), Sensor::Keyboard)));
    }

    #[test]
    fn cancel_returns_to_idle_without_outcome() {
        let mut session = DragSession::default();
        session.handle(
            DragInput::KeyboardPickUp {
                item: TaskId::from("t1"),
                rect: Rect::new(10.0, 50.0, 280.0, 60.0),
            },
            &tasks(),
            &zones(),
        );
        let event = session.handle(DragInput::Cancel, &tasks(), &zones());
        assert_eq!(event, DragEvent::Cancelled);
        assert_eq!(session.state(), &DragState::Idle);
    }

    #[test]
    fn unknown_item_never_starts_a_drag() {
        let mut session = DragSession::default();
        let event = session.handle(
            DragInput::KeyboardPickUp {
                item: TaskId::from("ghost"),
                rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            },
            &tasks(),
            &zones(),
        );
        assert_eq!(event, DragEvent::None);
        assert_eq!(session.state(), &DragState::Idle);
    }

    #[test]
    fn resolve_drop_uses_target_cards_column() {
        let outcome = resolve_drop(
            &TaskId::from("t1"),
            Some(&DroppableId::Card(TaskId::from("t2"))),
            &tasks(),
        );
        assert_eq!(
            outcome,
            DropOutcome::Move {
                task_id: TaskId::from("t1"),
                from: TaskStatus::Todo,
                to: TaskStatus::Done,
            }
        );
    }

    #[test]
    fn resolve_drop_on_vanished_source_is_invariant_noop() {
        let outcome = resolve_drop(
            &TaskId::from("gone"),
            Some(&DroppableId::Column(TaskStatus::Done)),
            &tasks(),
        );
        assert_eq!(outcome, DropOutcome::NoOp(NoOpReason::UnknownItem));
    }

    #[test]
    fn resolve_drop_on_unknown_card_has_no_target() {
        let outcome = resolve_drop(
            &TaskId::from("t1"),
            Some(&DroppableId::Card(TaskId::from("missing"))),
            &tasks(),
        );
        assert_eq!(outcome, DropOutcome::NoOp(NoOpReason::NoTarget));
    }
}
