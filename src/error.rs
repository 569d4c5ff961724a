//! Error taxonomy shared by every core operation.

use crate::storage::StorageError;

/// Coarse classification used for logging and for the HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authz",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Rejected before touching the datastore (empty message, bad handle, ...).
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not signed in")]
    Unauthenticated,
    /// A row-level policy rejected the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Validation(_) => ErrorCategory::Validation,
            CoreError::Unauthenticated => ErrorCategory::Authentication,
            CoreError::Forbidden(_) => ErrorCategory::Authorization,
            CoreError::NotFound(_) => ErrorCategory::NotFound,
            CoreError::Conflict(_) => ErrorCategory::Conflict,
            CoreError::Storage(StorageError::NotFound(_)) => ErrorCategory::NotFound,
            CoreError::Storage(StorageError::AlreadyExists(_)) => ErrorCategory::Conflict,
            CoreError::Storage(_) | CoreError::Io(_) | CoreError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Message safe to show an end user. Policy rejections and internal
    /// failures collapse to a generic text; details go to the log.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Authorization | ErrorCategory::Internal => {
                "something went wrong, please try again".to_string()
            }
            _ => self.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_generic_for_users() {
        let err = CoreError::forbidden("sender_id must equal caller");
        assert_eq!(err.category(), ErrorCategory::Authorization);
        assert!(!err.user_message().contains("sender_id"));
    }

    #[test]
    fn validation_message_is_shown() {
        let err = CoreError::validation("message is empty");
        assert_eq!(err.user_message(), "invalid input: message is empty");
    }

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let err = CoreError::from(StorageError::NotFound("profile".into()));
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
