use thiserror::Error;

use npcspawn_utils::error::{ErrorCategory, UserFriendlyError};

/// Contract violations rejected before a batch is created.
///
/// Operational failures never surface here; they become per-target outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("Invalid target name {name:?}: control characters are not allowed")]
    InvalidTarget { name: String },
}

impl UserFriendlyError for SpawnError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidTarget { name } => format!("Target name {name:?} is not valid"),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Target names may not contain control characters such as newlines or tabs".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec!["Pass each character name as its own --target value".to_string()]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}
