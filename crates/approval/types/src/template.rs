//! Workflow templates: versioned blueprints for approval routing
//!
//! A template is configuration. It decides when it applies (routing rules),
//! which levels an approval passes through (steps), and who may act at each
//! level (matrix). Open approvals never read the live template; they carry a
//! [`PolicySnapshot`] taken when they were created.

use crate::{
    ApprovalError, ApprovalResult, ConditionTree, Level, MatrixEntry, RoleId, RoutingRule,
    TemplateId, TemplateStats, TenantId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Template ─────────────────────────────────────────────────────────

/// Lifecycle of a template version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TemplateStatus {
    #[default]
    Draft,
    Active,
    Inactive,
    Archived,
}

/// What a rejection does to the workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RejectionBehavior {
    #[default]
    EndWorkflow,
    Escalate,
}

/// What an SLA breach does to the workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeoutBehavior {
    #[default]
    Escalate,
    /// Mark the approval overdue and emit a breach event, nothing more
    NotifyOnly,
}

/// A versioned, tenant-scoped approval workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    #[serde(default = "TemplateId::generate")]
    pub id: TemplateId,
    pub tenant_id: TenantId,
    /// Stable code shared by all versions of this template
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: TemplateStatus,
    pub default_sla_hours: u32,
    pub escalation_sla_hours: u32,
    #[serde(default)]
    pub allow_escalation: bool,
    #[serde(default)]
    pub allow_parallel_approval: bool,
    #[serde(default)]
    pub require_comments_on_reject: bool,
    #[serde(default)]
    pub auto_assign_by_role: bool,
    #[serde(default)]
    pub rejection_behavior: RejectionBehavior,
    #[serde(default)]
    pub timeout_behavior: TimeoutBehavior,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    #[serde(default)]
    pub matrix: Vec<MatrixEntry>,
    #[serde(default)]
    pub stats: TemplateStats,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowTemplate {
    /// Create a new draft template
    pub fn new(tenant_id: TenantId, code: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TemplateId::generate(),
            tenant_id,
            code: code.into(),
            name: name.into(),
            description: String::new(),
            version: 1,
            status: TemplateStatus::Draft,
            default_sla_hours: 24,
            escalation_sla_hours: 8,
            allow_escalation: false,
            allow_parallel_approval: false,
            require_comments_on_reject: false,
            auto_assign_by_role: false,
            rejection_behavior: RejectionBehavior::EndWorkflow,
            timeout_behavior: TimeoutBehavior::Escalate,
            steps: Vec::new(),
            rules: Vec::new(),
            matrix: Vec::new(),
            stats: TemplateStats::default(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sla_hours(mut self, default_hours: u32, escalation_hours: u32) -> Self {
        self.default_sla_hours = default_hours;
        self.escalation_sla_hours = escalation_hours;
        self
    }

    pub fn with_escalation(mut self) -> Self {
        self.allow_escalation = true;
        self
    }

    pub fn requiring_reject_comments(mut self) -> Self {
        self.require_comments_on_reject = true;
        self
    }

    pub fn with_rejection_behavior(mut self, behavior: RejectionBehavior) -> Self {
        self.rejection_behavior = behavior;
        self
    }

    pub fn with_timeout_behavior(mut self, behavior: TimeoutBehavior) -> Self {
        self.timeout_behavior = behavior;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a step; sequence numbers are unique per template
    pub fn add_step(&mut self, step: WorkflowStep) -> ApprovalResult<()> {
        if self.steps.iter().any(|s| s.sequence == step.sequence) {
            return Err(ApprovalError::ConfigurationError(format!(
                "duplicate step sequence {} in template '{}'",
                step.sequence, self.code
            )));
        }
        self.steps.push(step);
        self.steps.sort_by_key(|s| s.sequence);
        self.touch();
        Ok(())
    }

    pub fn add_rule(&mut self, rule: RoutingRule) {
        self.rules.push(rule);
        self.touch();
    }

    /// Add a matrix row; `(level, role)` is unique per template
    pub fn add_matrix_entry(&mut self, entry: MatrixEntry) -> ApprovalResult<()> {
        if self
            .matrix
            .iter()
            .any(|e| e.level == entry.level && e.required_role == entry.required_role)
        {
            return Err(ApprovalError::ConfigurationError(format!(
                "duplicate matrix entry ({}, {}) in template '{}'",
                entry.level, entry.required_role, self.code
            )));
        }
        self.matrix.push(entry);
        self.touch();
        Ok(())
    }

    /// Check everything that must hold before the template can go Active
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.steps.is_empty() {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' has no steps",
                self.code
            )));
        }
        if self.matrix.is_empty() {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' has no approval matrix entries",
                self.code
            )));
        }
        if self.default_sla_hours == 0 {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' has a zero default SLA",
                self.code
            )));
        }
        if self.allow_escalation && self.escalation_sla_hours == 0 {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' allows escalation with a zero escalation SLA",
                self.code
            )));
        }

        let mut sequences = HashSet::new();
        for step in &self.steps {
            if !sequences.insert(step.sequence) {
                return Err(ApprovalError::ConfigurationError(format!(
                    "duplicate step sequence {} in template '{}'",
                    step.sequence, self.code
                )));
            }
            if step.timeout_hours == Some(0) {
                return Err(ApprovalError::ConfigurationError(format!(
                    "step {} of template '{}' has a zero timeout",
                    step.sequence, self.code
                )));
            }
        }

        let mut keys = HashSet::new();
        for entry in &self.matrix {
            if !keys.insert((entry.level, entry.required_role.clone())) {
                return Err(ApprovalError::ConfigurationError(format!(
                    "duplicate matrix entry ({}, {}) in template '{}'",
                    entry.level, entry.required_role, self.code
                )));
            }
        }

        if let Some(first) = self.first_step() {
            if !self.matrix.iter().any(|e| e.enabled && e.level == first.level) {
                return Err(ApprovalError::ConfigurationError(format!(
                    "template '{}' has no enabled matrix entry for its first level {}",
                    self.code, first.level
                )));
            }
        }

        ConditionTree::compile(&self.rules)?;
        Ok(())
    }

    /// Draft/Inactive -> Active, after validation
    pub fn activate(&mut self) -> ApprovalResult<()> {
        if self.status == TemplateStatus::Archived {
            return Err(ApprovalError::ConfigurationError(format!(
                "template '{}' v{} is archived",
                self.code, self.version
            )));
        }
        self.validate()?;
        self.status = TemplateStatus::Active;
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) {
        if self.status != TemplateStatus::Archived {
            self.status = TemplateStatus::Inactive;
            self.touch();
        }
    }

    pub fn archive(&mut self) {
        self.status = TemplateStatus::Archived;
        self.touch();
    }

    pub fn is_active(&self) -> bool {
        self.status == TemplateStatus::Active
    }

    /// The step with the lowest sequence number
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().min_by_key(|s| s.sequence)
    }

    /// Compile the routing rules into an explicit condition tree
    pub fn routing(&self) -> ApprovalResult<ConditionTree> {
        ConditionTree::compile(&self.rules)
    }

    /// Freeze the parts of this template an approval instance depends on
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            template_id: self.id.clone(),
            template_code: self.code.clone(),
            template_version: self.version,
            allow_escalation: self.allow_escalation,
            require_comments_on_reject: self.require_comments_on_reject,
            rejection_behavior: self.rejection_behavior,
            timeout_behavior: self.timeout_behavior,
            default_sla_hours: self.default_sla_hours,
            escalation_sla_hours: self.escalation_sla_hours,
            steps: self.steps.clone(),
            matrix: self.matrix.clone(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ── Step ─────────────────────────────────────────────────────────────

/// What the approvers at a step are asked to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepAction {
    #[default]
    Approve,
    Review,
    Acknowledge,
}

/// One ordered step of a template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub level: Level,
    #[serde(default)]
    pub action: StepAction,
    /// Overrides the template's default SLA for approvals at this level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_hours: Option<u32>,
    #[serde(default)]
    pub can_skip: bool,
    #[serde(default)]
    pub requires_comment: bool,
    #[serde(default)]
    pub notify_on_entry: bool,
    #[serde(default)]
    pub notify_on_exit: bool,
}

impl WorkflowStep {
    pub fn new(sequence: u32, level: Level) -> Self {
        Self {
            sequence,
            name: String::new(),
            level,
            action: StepAction::Approve,
            timeout_hours: None,
            can_skip: false,
            requires_comment: false,
            notify_on_entry: false,
            notify_on_exit: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_action(mut self, action: StepAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_timeout_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    pub fn requiring_comment(mut self) -> Self {
        self.requires_comment = true;
        self
    }
}

// ── Policy snapshot ──────────────────────────────────────────────────

/// The template configuration an approval instance was created under
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub template_id: TemplateId,
    pub template_code: String,
    pub template_version: u32,
    pub allow_escalation: bool,
    pub require_comments_on_reject: bool,
    pub rejection_behavior: RejectionBehavior,
    pub timeout_behavior: TimeoutBehavior,
    pub default_sla_hours: u32,
    pub escalation_sla_hours: u32,
    pub steps: Vec<WorkflowStep>,
    pub matrix: Vec<MatrixEntry>,
}

impl PolicySnapshot {
    /// The first configured level strictly above `current`
    pub fn next_level(&self, current: Level) -> Option<Level> {
        self.steps
            .iter()
            .map(|s| s.level)
            .filter(|l| *l > current)
            .min()
    }

    pub fn step_for_level(&self, level: Level) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .filter(|s| s.level == level)
            .min_by_key(|s| s.sequence)
    }

    /// Enabled matrix rows for a level
    pub fn entries_at(&self, level: Level) -> impl Iterator<Item = &MatrixEntry> {
        self.matrix
            .iter()
            .filter(move |e| e.enabled && e.level == level)
    }

    /// Whether any enabled row at `level` allows escalating away from it
    pub fn escalation_permitted_at(&self, level: Level) -> bool {
        self.entries_at(level).any(|e| e.can_escalate)
    }

    /// SLA for a first-time approval at `level`
    pub fn sla_hours_for(&self, level: Level) -> u32 {
        self.step_for_level(level)
            .and_then(|s| s.timeout_hours)
            .unwrap_or(self.default_sla_hours)
    }

    pub fn requires_comment_at(&self, level: Level) -> bool {
        self.step_for_level(level)
            .map(|s| s.requires_comment)
            .unwrap_or(false)
    }

    pub fn roles_at(&self, level: Level) -> Vec<&RoleId> {
        self.entries_at(level).map(|e| &e.required_role).collect()
    }
}
