//! Task store port and adapters.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Task, TaskDraft, TaskFilter, TaskId, TaskStatus};

pub use http::HttpTaskStore;
pub use memory::MemoryTaskStore;

/// How a failed remote call should be reported.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureKind {
    /// The store understood the request and refused it.
    RemoteRejected,
    /// The store could not be reached or answered garbage.
    RemoteUnavailable,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store rejected request with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode store response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_)
            | Self::InvalidStatus(_)
            | Self::Validation(_)
            | Self::Rejected { .. } => FailureKind::RemoteRejected,
            Self::Unavailable(_) | Self::Decode(_) => FailureKind::RemoteUnavailable,
        }
    }
}

/// Remote CRUD and move operations over tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Creates a task and returns it with its assigned id.
    async fn create(&self, draft: &TaskDraft) -> Result<Task, StoreError>;

    async fn update(&self, task: &Task) -> Result<Task, StoreError>;

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError>;

    async fn move_task(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError>;

    /// Replaces the whole collection; all or nothing.
    async fn bulk_replace(&self, tasks: &[Task]) -> Result<(), StoreError>;
}
