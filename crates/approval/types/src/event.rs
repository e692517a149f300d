//! Domain events for approval lifecycle activity
//!
//! Events feed notification and audit consumers. They are emitted after the
//! change they describe has been persisted.

use crate::{InstanceId, Level, SlaStatus, TemplateId, TenantId, UserId, ValidationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every approval event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    pub tenant_id: TenantId,

    /// Actor who triggered the event, `None` for background activity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<UserId>,

    /// The actual event
    pub event: ApprovalEvent,
}

impl ApprovalEventEnvelope {
    pub fn new(
        tenant_id: TenantId,
        actor: Option<UserId>,
        event: ApprovalEvent,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            tenant_id,
            actor,
            event,
        }
    }
}

/// Approval events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    // ── Lifecycle ────────────────────────────────────────────────────
    ApprovalRequested {
        instance_id: InstanceId,
        validation_id: ValidationId,
        template_id: TemplateId,
        level: Level,
        due_date: DateTime<Utc>,
    },

    ApprovalAssigned {
        instance_id: InstanceId,
        assignee: UserId,
    },

    /// A vote was counted but the quorum is not met yet
    ApprovalVoteRecorded {
        instance_id: InstanceId,
        approver: UserId,
        votes: u32,
        quorum: u32,
    },

    ApprovalGranted {
        instance_id: InstanceId,
        validation_id: ValidationId,
        approver: UserId,
    },

    ApprovalRejected {
        instance_id: InstanceId,
        validation_id: ValidationId,
        rejected_by: UserId,
        reason: Option<String>,
    },

    MoreInfoRequested {
        instance_id: InstanceId,
        requested_by: UserId,
        info_required: String,
    },

    InfoProvided {
        instance_id: InstanceId,
        provided_by: UserId,
    },

    ApprovalCancelled {
        instance_id: InstanceId,
        reason: String,
    },

    CommentAdded {
        instance_id: InstanceId,
        author: UserId,
        internal: bool,
    },

    // ── Escalation & SLA ─────────────────────────────────────────────
    ApprovalEscalated {
        original_id: InstanceId,
        successor_id: InstanceId,
        from_level: Level,
        to_level: Level,
        reason: String,
    },

    SlaStatusChanged {
        instance_id: InstanceId,
        from: SlaStatus,
        to: SlaStatus,
    },

    SlaBreached {
        instance_id: InstanceId,
        level: Level,
        due_date: DateTime<Utc>,
    },
}

impl ApprovalEvent {
    /// The instance the event is about
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Self::ApprovalRequested { instance_id, .. }
            | Self::ApprovalAssigned { instance_id, .. }
            | Self::ApprovalVoteRecorded { instance_id, .. }
            | Self::ApprovalGranted { instance_id, .. }
            | Self::ApprovalRejected { instance_id, .. }
            | Self::MoreInfoRequested { instance_id, .. }
            | Self::InfoProvided { instance_id, .. }
            | Self::ApprovalCancelled { instance_id, .. }
            | Self::CommentAdded { instance_id, .. }
            | Self::SlaStatusChanged { instance_id, .. }
            | Self::SlaBreached { instance_id, .. } => instance_id,
            Self::ApprovalEscalated { original_id, .. } => original_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalAssigned { .. } => "approval_assigned",
            Self::ApprovalVoteRecorded { .. } => "approval_vote_recorded",
            Self::ApprovalGranted { .. } => "approval_granted",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::MoreInfoRequested { .. } => "more_info_requested",
            Self::InfoProvided { .. } => "info_provided",
            Self::ApprovalCancelled { .. } => "approval_cancelled",
            Self::CommentAdded { .. } => "comment_added",
            Self::ApprovalEscalated { .. } => "approval_escalated",
            Self::SlaStatusChanged { .. } => "sla_status_changed",
            Self::SlaBreached { .. } => "sla_breached",
        }
    }
}
