//! Two-step delete confirmation per card.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::types::TaskId;

pub const DEFAULT_ARM_WINDOW: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArmState {
    Unarmed,
    Armed { deadline: Instant },
    /// Confirmed; the remote delete is in flight.
    Deleting,
    Deleted,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArmAction {
    Armed { deadline: Instant },
    /// Second activation inside the window: the caller must issue the delete.
    Confirm,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct DeleteArm {
    state: ArmState,
    window: Duration,
}

impl DeleteArm {
    pub fn new(window: Duration) -> Self {
        Self {
            state: ArmState::Unarmed,
            window,
        }
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        matches!(self.state, ArmState::Armed { deadline } if now < deadline)
    }

    pub fn activate(&mut self, now: Instant) -> ArmAction {
        match self.state {
            ArmState::Armed { deadline } if now < deadline => {
                self.state = ArmState::Deleting;
                ArmAction::Confirm
            }
            ArmState::Unarmed | ArmState::Armed { .. } => {
                let deadline = now + self.window;
                self.state = ArmState::Armed { deadline };
                ArmAction::Armed { deadline }
            }
            ArmState::Deleting | ArmState::Deleted => ArmAction::Ignored,
        }
    }

    /// Auto-disarms an expired arm. Returns true when a disarm happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.state {
            ArmState::Armed { deadline } if now >= deadline => {
                self.state = ArmState::Unarmed;
                true
            }
            _ => false,
        }
    }

    pub fn delete_succeeded(&mut self) {
        if self.state == ArmState::Deleting {
            self.state = ArmState::Deleted;
        }
    }

    pub fn delete_failed(&mut self) {
        if self.state == ArmState::Deleting {
            self.state = ArmState::Unarmed;
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self.state {
            ArmState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }
}

/// Arming state for every mounted card. Entries only exist while a card is
/// armed or deleting.
#[derive(Debug, Clone)]
pub struct ArmingTable {
    window: Duration,
    arms: HashMap<TaskId, DeleteArm>,
}

impl Default for ArmingTable {
    fn default() -> Self {
        Self::new(DEFAULT_ARM_WINDOW)
    }
}

impl ArmingTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arms: HashMap::new(),
        }
    }

    pub fn state(&self, id: &TaskId) -> ArmState {
        self.arms
            .get(id)
            .map(DeleteArm::state)
            .unwrap_or(ArmState::Unarmed)
    }

    pub fn activate(&mut self, id: &TaskId, now: Instant) -> ArmAction {
        let window = self.window;
        let arm = self
            .arms
            .entry(id.clone())
            .or_insert_with(|| DeleteArm::new(window));
        let action = arm.activate(now);
        debug!(task_id = %id, ?action, "delete activation");
        action
    }

    /// Disarms every expired entry and returns their ids.
    pub fn tick(&mut self, now: Instant) -> Vec<TaskId> {
        let mut disarmed = Vec::new();
        self.arms.retain(|id, arm| {
            if arm.tick(now) {
                debug!(task_id = %id, "delete arm expired");
                disarmed.push(id.clone());
                false
            } else {
                true
            }
        });
        disarmed
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.arms.values().filter_map(DeleteArm::deadline).min()
    }

    pub fn settle(&mut self, id: &TaskId, succeeded: bool) {
        let Some(arm) = self.arms.get_mut(id) else {
            return;
        };
        if succeeded {
            arm.delete_succeeded();
        } else {
            arm.delete_failed();
        }
        // Deleted and reverted arms are both finished with.
        self.arms.remove(id);
    }

    /// Drops arming for a card that is no longer rendered.
    pub fn unmount(&mut self, id: &TaskId) {
        self.arms.remove(id);
    }

    /// Drops arming for every card not in `present`, keeping in-flight deletes.
    pub fn retain_mounted<'a>(&mut self, present: impl IntoIterator<Item = &'a TaskId>) {
        let present: std::collections::HashSet<&TaskId> = present.into_iter().collect();
        self.arms
            .retain(|id, arm| arm.state == ArmState::Deleting || present.contains(id));
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }
}
