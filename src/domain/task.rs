use std::fmt;

use serde::{Deserialize, Serialize};

/// What a download task fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Article,
    Image,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Article => write!(f, "article"),
            TaskKind::Image => write!(f, "image"),
        }
    }
}

/// Lifecycle of a single article or image fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed(_) | TaskState::Canceled
        )
    }

    /// Terminal outcomes that will not run again in this pass
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }
}
