//! Error types for the approval layer

use crate::{ApprovalStatus, InstanceId, Level, TemplateId};

/// Errors that can occur in approval operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApprovalError {
    #[error("Cannot {action} an approval in status {from:?}")]
    InvalidStateTransition {
        action: &'static str,
        from: ApprovalStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No eligible approver at level {level}: {reason}")]
    NoEligibleApprover { level: Level, reason: String },

    #[error("Operation '{operation}' not allowed: {reason}")]
    OperationNotAllowed {
        operation: &'static str,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("Approval instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("No workflow template matches validation {0}")]
    NoMatchingWorkflow(String),

    #[error("Stale version for {id}: expected {expected}, found {actual}")]
    StaleVersion {
        id: InstanceId,
        expected: u64,
        actual: u64,
    },

    #[error("Store error: {0}")]
    Store(String),
}

impl ApprovalError {
    pub fn not_allowed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::OperationNotAllowed {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether the caller can reasonably retry the same request
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
    }

    /// Configuration errors are reported to administrators, not to the
    /// person resolving the approval.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;
