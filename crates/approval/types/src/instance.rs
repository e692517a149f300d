//! Approval instances: the runtime state machine
//!
//! ```text
//! Pending ──assign──> InReview ──approve──> Approved
//!    │                  │  ▲  ──reject───> Rejected
//!    │                  │  │
//!    │   request_more_info  provide_info
//!    │                  ▼  │
//!    │            MoreInfoRequired ──approve/reject──> ...
//!    │
//!    └── escalate (from any open state) ──> Escalated + successor at a higher level
//!    └── cancel   (from any open state) ──> Cancelled
//! ```
//!
//! Every transition appends exactly one history entry. Once an instance
//! leaves the open states its identity fields never change again; comments
//! and history can still be appended.

use crate::{
    Actor, ApprovalError, ApprovalResult, Comment, CommentLog, HistoryAction, HistoryEntry,
    HistoryLog, InstanceId, Level, PolicySnapshot, RoleId, RolePolicy, TemplateId, TenantId,
    UserId, ValidationSnapshot,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking the request reason of an escalated successor
pub const ESCALATION_MARKER: &str = "[ESCALATED]";

/// Priority 1 is the most urgent
pub const HIGHEST_PRIORITY: u8 = 1;
pub const DEFAULT_PRIORITY: u8 = 3;

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle state of an approval instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ApprovalStatus {
    #[default]
    Pending,
    InReview,
    MoreInfoRequired,
    Approved,
    Rejected,
    /// Terminal for this instance; a successor carries the request on
    Escalated,
    Cancelled,
}

impl ApprovalStatus {
    /// States in which the approval still waits for someone
    pub const OPEN: [ApprovalStatus; 3] = [
        ApprovalStatus::Pending,
        ApprovalStatus::InReview,
        ApprovalStatus::MoreInfoRequired,
    ];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// Where an open approval stands against its due date
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SlaStatus {
    #[default]
    OnTime,
    AtRisk,
    Breached,
}

impl SlaStatus {
    /// Classify purely from `(now, due_date)`.
    ///
    /// Breached when nothing remains, AtRisk when what remains fits in the
    /// window, OnTime otherwise.
    pub fn classify(now: DateTime<Utc>, due_date: DateTime<Utc>, at_risk_window: Duration) -> Self {
        let remaining = due_date - now;
        if remaining <= Duration::zero() {
            SlaStatus::Breached
        } else if remaining <= at_risk_window {
            SlaStatus::AtRisk
        } else {
            SlaStatus::OnTime
        }
    }
}

/// A change in SLA status observed by [`ApprovalInstance::refresh_sla`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaTransition {
    pub from: SlaStatus,
    pub to: SlaStatus,
}

impl SlaTransition {
    pub fn is_new_breach(&self) -> bool {
        self.to == SlaStatus::Breached && self.from != SlaStatus::Breached
    }
}

// ── Requests & votes ─────────────────────────────────────────────────

/// Everything needed to open the first approval for a validation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub validation: ValidationSnapshot,
    pub requester: Actor,
    pub reason: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl ApprovalRequest {
    pub fn new(validation: ValidationSnapshot, requester: Actor, reason: impl Into<String>) -> Self {
        Self {
            validation,
            requester,
            reason: reason.into(),
            priority: DEFAULT_PRIORITY,
            category: None,
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.max(HIGHEST_PRIORITY);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// One approver's sign-off toward the quorum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalVote {
    pub approver: UserId,
    pub approver_name: String,
    /// The matrix role this vote counts toward
    pub role: RoleId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// Result of an `approve` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote counted, the role's quorum is not reached yet
    Recorded { votes: u32, quorum: u32 },
    /// Quorum reached, the instance is Approved
    Approved,
}

// ── Approval Instance ────────────────────────────────────────────────

/// One approval request at one level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    /// The validation this approval is about (read-only copy)
    pub validation: ValidationSnapshot,
    pub level: Level,
    /// Template configuration frozen at creation
    pub policy: PolicySnapshot,
    pub status: ApprovalStatus,
    pub sla_status: SlaStatus,
    /// Revision for optimistic concurrency, advanced by the store
    pub version: u64,

    pub requested_by: UserId,
    pub requested_by_name: String,
    pub requested_at: DateTime<Utc>,
    pub request_reason: String,
    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_requested: Option<String>,

    pub due_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_minutes: Option<i64>,
    pub is_overdue: bool,

    pub is_escalated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_from_id: Option<InstanceId>,
    /// Number of escalations between the original request and this instance
    pub escalation_depth: u32,

    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Smallest per-role quorum at this level
    pub quorum: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<ApprovalVote>,

    comments: CommentLog,
    history: HistoryLog,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalInstance {
    /// Open the first approval for a request at `level`.
    ///
    /// The due date comes from the step configured for `level`, falling back
    /// to the template default. A zero SLA is a configuration error.
    pub fn create(
        request: ApprovalRequest,
        policy: PolicySnapshot,
        level: Level,
        quorum: u32,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Self> {
        let sla_hours = policy.sla_hours_for(level);
        if sla_hours == 0 {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' has a zero SLA at level {}",
                policy.template_code, level
            )));
        }

        let ApprovalRequest {
            validation,
            requester,
            reason,
            priority,
            category,
            tags,
        } = request;
        let due_date = now + Duration::hours(i64::from(sla_hours));

        let mut instance = Self {
            id: InstanceId::generate(),
            tenant_id: validation.tenant_id.clone(),
            validation,
            level,
            policy,
            status: ApprovalStatus::Pending,
            sla_status: SlaStatus::OnTime,
            version: 0,
            requested_by: requester.id.clone(),
            requested_by_name: requester.name.clone(),
            requested_at: now,
            request_reason: reason,
            created_at: now,
            assigned_to: None,
            assigned_to_name: None,
            assigned_at: None,
            resolved_by: None,
            resolved_by_name: None,
            resolved_at: None,
            resolution_notes: None,
            rejection_reason: None,
            info_requested: None,
            due_date,
            response_time_minutes: None,
            is_overdue: false,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            escalated_from_id: None,
            escalation_depth: 0,
            priority: priority.max(HIGHEST_PRIORITY),
            category,
            tags,
            quorum: quorum.max(1),
            votes: Vec::new(),
            comments: CommentLog::default(),
            history: HistoryLog::default(),
            updated_at: now,
        };
        instance.record(
            HistoryAction::Requested,
            format!(
                "Approval requested at level {} by {} (due {})",
                level,
                requester.name,
                due_date.to_rfc3339()
            ),
            Some(requester.id),
            now,
        );
        Ok(instance)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Pending -> InReview
    pub fn assign(&mut self, assignee: &Actor, now: DateTime<Utc>) -> ApprovalResult<()> {
        self.ensure("assign", &[ApprovalStatus::Pending])?;

        self.assigned_to = Some(assignee.id.clone());
        self.assigned_to_name = Some(assignee.name.clone());
        self.assigned_at = Some(now);
        self.status = ApprovalStatus::InReview;
        self.record(
            HistoryAction::Assigned,
            format!("Assigned to {}", assignee.name),
            Some(assignee.id.clone()),
            now,
        );
        Ok(())
    }

    /// Record an approval under one of the roles in `authority`.
    ///
    /// Each vote counts toward a single role: the one among `authority`
    /// closest to its quorum. The instance resolves once distinct approvers
    /// of one role reach that role's quorum; votes cast under different
    /// roles never add up.
    pub fn approve(
        &mut self,
        resolver: &Actor,
        authority: &[RolePolicy],
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<VoteOutcome> {
        self.ensure(
            "approve",
            &[ApprovalStatus::InReview, ApprovalStatus::MoreInfoRequired],
        )?;
        let notes = notes.filter(|n| !n.trim().is_empty());
        if notes.is_none() && self.policy.requires_comment_at(self.level) {
            return Err(ApprovalError::ValidationError(format!(
                "a comment is required to approve at level {}",
                self.level
            )));
        }
        if self.has_voted(&resolver.id) {
            return Err(ApprovalError::ValidationError(format!(
                "{} has already approved this request",
                resolver.name
            )));
        }

        let Some(counted) = authority
            .iter()
            .min_by_key(|r| r.quorum.max(1).saturating_sub(self.votes_for(&r.role)))
        else {
            return Err(ApprovalError::NotAuthorized(format!(
                "{} holds no role at level {}",
                resolver.id, self.level
            )));
        };
        let role = counted.role.clone();
        let quorum = counted.quorum.max(1);

        self.votes.push(ApprovalVote {
            approver: resolver.id.clone(),
            approver_name: resolver.name.clone(),
            role: role.clone(),
            notes: notes.clone(),
            at: now,
        });
        let votes = self.votes_for(&role);

        if votes < quorum {
            self.record(
                HistoryAction::ApprovalRecorded,
                format!(
                    "Approval recorded by {} as {} ({} of {})",
                    resolver.name, role, votes, quorum
                ),
                Some(resolver.id.clone()),
                now,
            );
            return Ok(VoteOutcome::Recorded { votes, quorum });
        }

        self.resolve(resolver, notes, now);
        self.status = ApprovalStatus::Approved;
        self.record(
            HistoryAction::Approved,
            format!("Approved by {}", resolver.name),
            Some(resolver.id.clone()),
            now,
        );
        Ok(VoteOutcome::Approved)
    }

    /// InReview/MoreInfoRequired -> Rejected
    pub fn reject(
        &mut self,
        resolver: &Actor,
        reason: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.ensure_can_reject(reason)?;
        let reason = reason.trim();

        self.resolve(resolver, notes.filter(|n| !n.trim().is_empty()), now);
        if !reason.is_empty() {
            self.rejection_reason = Some(reason.to_string());
        }
        self.status = ApprovalStatus::Rejected;
        self.record(
            HistoryAction::Rejected,
            Self::rejection_description(resolver, reason),
            Some(resolver.id.clone()),
            now,
        );
        Ok(())
    }

    /// Record a rejection that hands the request to the next level instead
    /// of ending it. The instance stays open; the escalation that follows
    /// closes it.
    pub fn reject_upward(
        &mut self,
        resolver: &Actor,
        reason: &str,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.ensure_can_reject(reason)?;
        let reason = reason.trim();

        if !reason.is_empty() {
            self.rejection_reason = Some(reason.to_string());
        }
        self.resolution_notes = notes.filter(|n| !n.trim().is_empty());
        self.record(
            HistoryAction::Rejected,
            Self::rejection_description(resolver, reason),
            Some(resolver.id.clone()),
            now,
        );
        Ok(())
    }

    /// Run the checks `reject` would run, without changing anything
    pub fn ensure_can_reject(&self, reason: &str) -> ApprovalResult<()> {
        self.ensure(
            "reject",
            &[ApprovalStatus::InReview, ApprovalStatus::MoreInfoRequired],
        )?;
        if reason.trim().is_empty()
            && (self.policy.require_comments_on_reject || self.policy.requires_comment_at(self.level))
        {
            return Err(ApprovalError::ValidationError(
                "a rejection reason is required".into(),
            ));
        }
        Ok(())
    }

    /// InReview -> MoreInfoRequired. The request stays open.
    pub fn request_more_info(
        &mut self,
        resolver: &Actor,
        info_required: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.ensure("request more info on", &[ApprovalStatus::InReview])?;
        let info_required = info_required.trim();
        if info_required.is_empty() {
            return Err(ApprovalError::ValidationError(
                "describe the information required".into(),
            ));
        }

        self.info_requested = Some(info_required.to_string());
        self.status = ApprovalStatus::MoreInfoRequired;
        self.record(
            HistoryAction::MoreInfoRequested,
            format!("{} requested more information: {}", resolver.name, info_required),
            Some(resolver.id.clone()),
            now,
        );
        Ok(())
    }

    /// MoreInfoRequired -> InReview, with the answer kept as a comment
    pub fn provide_info(
        &mut self,
        author: &Actor,
        information: &str,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        self.ensure("provide info on", &[ApprovalStatus::MoreInfoRequired])?;
        let information = information.trim();
        if information.is_empty() {
            return Err(ApprovalError::ValidationError(
                "the requested information is empty".into(),
            ));
        }

        self.comments.append(Comment {
            author: author.id.clone(),
            author_name: author.name.clone(),
            text: information.to_string(),
            internal: false,
            created_at: now,
        });
        self.info_requested = None;
        self.status = ApprovalStatus::InReview;
        self.record(
            HistoryAction::InfoProvided,
            format!("{} provided the requested information", author.name),
            Some(author.id.clone()),
            now,
        );
        Ok(())
    }

    /// Hand the request to a higher level.
    ///
    /// Marks this instance Escalated and returns its successor. The caller
    /// is responsible for persisting both.
    pub fn escalate(
        &mut self,
        reason: &str,
        escalated_by: &Actor,
        new_level: Level,
        successor_quorum: u32,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalInstance> {
        self.ensure("escalate", &ApprovalStatus::OPEN)?;
        if !self.policy.allow_escalation {
            return Err(ApprovalError::not_allowed(
                "escalate",
                format!("template '{}' does not allow escalation", self.policy.template_code),
            ));
        }
        if !self.policy.escalation_permitted_at(self.level) {
            return Err(ApprovalError::not_allowed(
                "escalate",
                format!("matrix does not permit escalation from level {}", self.level),
            ));
        }
        if new_level <= self.level {
            return Err(ApprovalError::not_allowed(
                "escalate",
                format!(
                    "target level {} is not above current level {}",
                    new_level, self.level
                ),
            ));
        }
        if self.policy.escalation_sla_hours == 0 {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' has a zero escalation SLA",
                self.policy.template_code
            )));
        }

        self.status = ApprovalStatus::Escalated;
        self.is_escalated = true;
        self.escalated_at = Some(now);
        self.escalation_reason = Some(reason.to_string());
        self.record(
            HistoryAction::Escalated,
            format!(
                "Escalated from level {} to level {} by {}: {}",
                self.level, new_level, escalated_by.name, reason
            ),
            Some(escalated_by.id.clone()),
            now,
        );

        let mut successor = Self {
            id: InstanceId::generate(),
            tenant_id: self.tenant_id.clone(),
            validation: self.validation.clone(),
            level: new_level,
            policy: self.policy.clone(),
            status: ApprovalStatus::Pending,
            sla_status: SlaStatus::OnTime,
            version: 0,
            requested_by: self.requested_by.clone(),
            requested_by_name: self.requested_by_name.clone(),
            requested_at: self.requested_at,
            request_reason: format!("{} {}", ESCALATION_MARKER, reason),
            created_at: now,
            assigned_to: None,
            assigned_to_name: None,
            assigned_at: None,
            resolved_by: None,
            resolved_by_name: None,
            resolved_at: None,
            resolution_notes: None,
            rejection_reason: None,
            info_requested: None,
            due_date: now + Duration::hours(i64::from(self.policy.escalation_sla_hours)),
            response_time_minutes: None,
            is_overdue: false,
            is_escalated: false,
            escalated_at: None,
            escalation_reason: None,
            escalated_from_id: Some(self.id.clone()),
            escalation_depth: self.escalation_depth + 1,
            priority: self.priority.saturating_sub(1).max(HIGHEST_PRIORITY),
            category: self.category.clone(),
            tags: self.tags.clone(),
            quorum: successor_quorum.max(1),
            votes: Vec::new(),
            comments: CommentLog::default(),
            history: HistoryLog::default(),
            updated_at: now,
        };
        successor.record(
            HistoryAction::EscalatedFrom,
            format!("Escalated from {} at level {}: {}", self.id, self.level, reason),
            Some(escalated_by.id.clone()),
            now,
        );
        Ok(successor)
    }

    /// Any open state -> Cancelled
    pub fn cancel(&mut self, by: &Actor, reason: &str, now: DateTime<Utc>) -> ApprovalResult<()> {
        self.ensure("cancel", &ApprovalStatus::OPEN)?;

        self.resolved_by = Some(by.id.clone());
        self.resolved_by_name = Some(by.name.clone());
        self.resolved_at = Some(now);
        self.resolution_notes = Some(reason.to_string());
        self.status = ApprovalStatus::Cancelled;
        self.record(
            HistoryAction::Cancelled,
            format!("Cancelled by {}: {}", by.name, reason),
            Some(by.id.clone()),
            now,
        );
        Ok(())
    }

    /// Append a comment. Allowed in every state.
    pub fn add_comment(
        &mut self,
        author: &Actor,
        text: &str,
        internal: bool,
        now: DateTime<Utc>,
    ) -> ApprovalResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApprovalError::ValidationError("comment is empty".into()));
        }
        self.comments.append(Comment {
            author: author.id.clone(),
            author_name: author.name.clone(),
            text: text.to_string(),
            internal,
            created_at: now,
        });
        self.record(
            HistoryAction::Commented,
            format!("Comment by {}", author.name),
            Some(author.id.clone()),
            now,
        );
        Ok(())
    }

    /// Recompute the SLA status of an open instance.
    ///
    /// Returns the transition when the status changed, `None` otherwise.
    /// Calling it again at the same instant is a no-op.
    pub fn refresh_sla(
        &mut self,
        now: DateTime<Utc>,
        at_risk_window: Duration,
    ) -> Option<SlaTransition> {
        if !self.is_open() {
            return None;
        }
        let next = SlaStatus::classify(now, self.due_date, at_risk_window);
        if next == SlaStatus::Breached {
            self.is_overdue = true;
        }
        if next == self.sla_status {
            return None;
        }

        let transition = SlaTransition {
            from: self.sla_status,
            to: next,
        };
        self.sla_status = next;
        self.record(
            HistoryAction::SlaStatusChanged,
            format!("SLA status {:?} -> {:?}", transition.from, transition.to),
            None,
            now,
        );
        Some(transition)
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn template_id(&self) -> &TemplateId {
        &self.policy.template_id
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.history.entries()
    }

    pub fn comments(&self) -> &[Comment] {
        self.comments.entries()
    }

    pub fn has_voted(&self, user: &UserId) -> bool {
        self.votes.iter().any(|v| &v.approver == user)
    }

    /// Distinct approvals counted toward `role`
    pub fn votes_for(&self, role: &RoleId) -> u32 {
        self.votes.iter().filter(|v| &v.role == role).count() as u32
    }

    /// Time left until the due date (negative once overdue)
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.due_date - now
    }

    /// Hours from the original request to resolution, if resolved
    pub fn completion_hours(&self) -> Option<f64> {
        self.resolved_at
            .map(|at| (at - self.requested_at).num_seconds() as f64 / 3600.0)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn ensure(&self, action: &'static str, allowed: &[ApprovalStatus]) -> ApprovalResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ApprovalError::InvalidStateTransition {
                action,
                from: self.status,
            })
        }
    }

    fn rejection_description(resolver: &Actor, reason: &str) -> String {
        if reason.is_empty() {
            format!("Rejected by {}", resolver.name)
        } else {
            format!("Rejected by {}: {}", resolver.name, reason)
        }
    }

    fn resolve(&mut self, resolver: &Actor, notes: Option<String>, now: DateTime<Utc>) {
        self.resolved_by = Some(resolver.id.clone());
        self.resolved_by_name = Some(resolver.name.clone());
        self.resolved_at = Some(now);
        self.resolution_notes = notes;
        self.response_time_minutes = Some((now - self.requested_at).num_minutes());
    }

    fn record(
        &mut self,
        action: HistoryAction,
        description: impl Into<String>,
        actor: Option<UserId>,
        now: DateTime<Utc>,
    ) {
        self.history.append(action, description, actor, now);
        self.updated_at = now;
    }
}
