//! Change notification channel.
//!
//! Components that mutate a task outside the optimistic path announce it
//! here once the store has confirmed the change. Subscribers own a
//! [`Subscription`] for exactly as long as they are mounted.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::types::TaskId;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    Updated(TaskId),
    Deleted(TaskId),
}

impl TaskChange {
    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Updated(id) | Self::Deleted(id) => id,
        }
    }
}

/// Cheap to clone; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct ChangeChannel {
    sender: broadcast::Sender<TaskChange>,
}

impl Default for ChangeChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers received the change.
    pub fn publish(&self, change: TaskChange) -> usize {
        debug!(?change, "publishing task change");
        // Publishing with nobody listening is not an error.
        self.sender.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<TaskChange>,
}

impl Subscription {
    /// Waits for the next change. `None` once every publisher is gone.
    ///
    /// A lagging subscriber skips what it missed: any change leads to a full
    /// refetch, so the next delivered change is enough to resync.
    pub async fn recv(&mut self) -> Option<TaskChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "change subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<TaskChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "change subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Explicit teardown; dropping the subscription has the same effect.
    pub fn unsubscribe(self) {}
}
