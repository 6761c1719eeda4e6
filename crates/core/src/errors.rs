use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::document::SignNo;

/// Stable failure kind reported to callers alongside an optional technical
/// message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotAuthorizedStep,
    InvalidState,
    Conflict,
    Forbidden,
    Store,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::NotAuthorizedStep => "not_authorized_step",
            Self::InvalidState => "invalid_state",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Store => "store",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("actor `{actor_id}` is not the current approver of document {sign_no}")]
    NotAuthorizedStep { sign_no: SignNo, actor_id: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("concurrent update conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("store failure: {0}")]
    Store(String),
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotAuthorizedStep { .. } => ErrorKind::NotAuthorizedStep,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Only lost races are worth retrying against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn document_not_found(sign_no: SignNo) -> Self {
        Self::NotFound(format!("document {sign_no}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::document::SignNo;
    use crate::errors::{ApprovalError, ErrorKind};

    #[test]
    fn kinds_are_stable_snake_case_strings() {
        let error = ApprovalError::NotAuthorizedStep { sign_no: SignNo(7), actor_id: "E300".into() };

        assert_eq!(error.kind(), ErrorKind::NotAuthorizedStep);
        assert_eq!(error.kind().as_str(), "not_authorized_step");
        assert_eq!(
            serde_json::to_string(&ErrorKind::InvalidState).expect("serialize"),
            "\"invalid_state\""
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(ApprovalError::Conflict("document 1 revision 3".into()).is_retryable());
        assert!(!ApprovalError::Store("disk full".into()).is_retryable());
        assert!(!ApprovalError::validation("title is required").is_retryable());
    }

    #[test]
    fn not_authorized_message_names_actor_and_document() {
        let error = ApprovalError::NotAuthorizedStep { sign_no: SignNo(42), actor_id: "E300".into() };
        assert_eq!(error.to_string(), "actor `E300` is not the current approver of document 42");
    }
}
