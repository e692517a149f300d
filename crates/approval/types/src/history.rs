//! Audit trail and discussion attached to an approval instance
//!
//! Both logs are append-only. Only the owning [`crate::ApprovalInstance`]
//! can append to them; everyone else gets a read-only slice.

use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed vocabulary of audit actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryAction {
    Requested,
    Assigned,
    ApprovalRecorded,
    Approved,
    Rejected,
    MoreInfoRequested,
    InfoProvided,
    Escalated,
    EscalatedFrom,
    Cancelled,
    Commented,
    SlaStatusChanged,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Assigned => "assigned",
            Self::ApprovalRecorded => "approval_recorded",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::MoreInfoRequested => "more_info_requested",
            Self::InfoProvided => "info_provided",
            Self::Escalated => "escalated",
            Self::EscalatedFrom => "escalated_from",
            Self::Cancelled => "cancelled",
            Self::Commented => "commented",
            Self::SlaStatusChanged => "sla_status_changed",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonically increasing within one instance
    pub sequence: u64,
    pub action: HistoryAction,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit trail
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog(Vec<HistoryEntry>);

impl HistoryLog {
    pub(crate) fn append(
        &mut self,
        action: HistoryAction,
        description: impl Into<String>,
        actor: Option<UserId>,
        timestamp: DateTime<Utc>,
    ) {
        let sequence = self.0.len() as u64;
        self.0.push(HistoryEntry {
            sequence,
            action,
            description: description.into(),
            actor,
            timestamp,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.0.last()
    }

    pub fn count_of(&self, action: HistoryAction) -> usize {
        self.0.iter().filter(|e| e.action == action).count()
    }
}

/// A comment left on an approval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: UserId,
    pub author_name: String,
    pub text: String,
    /// Internal comments are hidden from the requester
    #[serde(default)]
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only comment thread
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentLog(Vec<Comment>);

impl CommentLog {
    pub(crate) fn append(&mut self, comment: Comment) {
        self.0.push(comment);
    }

    pub fn entries(&self) -> &[Comment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comments visible to the requester
    pub fn public(&self) -> impl Iterator<Item = &Comment> {
        self.0.iter().filter(|c| !c.internal)
    }
}
