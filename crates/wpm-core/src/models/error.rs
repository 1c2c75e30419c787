use thiserror::Error;

use crate::models::{ManagerAction, ManagerId, TaskType};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    Timeout,
    ProcessFailure,
    CatalogFailure,
    EngineUnavailable,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub manager: Option<ManagerId>,
    pub task: Option<TaskType>,
    pub action: Option<ManagerAction>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            manager: None,
            task: None,
            action: None,
            kind,
            message: message.into(),
        }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::CatalogFailure, message).manager(ManagerId::WinGet)
    }

    pub fn manager(mut self, manager: ManagerId) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn task(mut self, task: TaskType) -> Self {
        self.task = Some(task);
        self
    }

    pub fn action(mut self, action: ManagerAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Fills attribution fields that are still empty, keeping whatever the
    /// failing layer already recorded.
    pub fn attribute(self, manager: ManagerId, task: TaskType, action: ManagerAction) -> Self {
        Self {
            manager: self.manager.or(Some(manager)),
            task: self.task.or(Some(task)),
            action: self.action.or(Some(action)),
            kind: self.kind,
            message: self.message,
        }
    }
}
