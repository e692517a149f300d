//! Approval matrix: who may resolve a request at which level
//!
//! A template's matrix maps `(level, role)` to approval authority. The
//! resolver in the engine turns matrix rows into an [`ApproverPolicy`] for
//! one level, which the assignment boundary uses to pick people.

use crate::{Actor, Level, RoleId, UserId, ValidationSnapshot};
use serde::{Deserialize, Serialize};

/// One row of the approval matrix, unique per `(level, required_role)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub level: Level,
    pub required_role: RoleId,
    /// Minimum number of distinct approvers
    #[serde(default = "default_min_approvers")]
    pub min_approvers: u32,
    #[serde(default)]
    pub can_escalate: bool,
    #[serde(default)]
    pub can_delegate: bool,
    /// This role may not resolve validations with more errors than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_error_count: Option<u64>,
    /// This role may not resolve validations above this amount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    /// Explicit allow-list. Empty means any holder of `required_role`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_users: Vec<UserId>,
    /// Used when no primary holder is available and delegation is allowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegates: Vec<UserId>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_min_approvers() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl MatrixEntry {
    pub fn new(level: Level, required_role: RoleId) -> Self {
        Self {
            level,
            required_role,
            min_approvers: 1,
            can_escalate: false,
            can_delegate: false,
            max_error_count: None,
            max_amount: None,
            allowed_users: Vec::new(),
            delegates: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_min_approvers(mut self, min: u32) -> Self {
        self.min_approvers = min;
        self
    }

    pub fn escalatable(mut self) -> Self {
        self.can_escalate = true;
        self
    }

    pub fn with_delegates(mut self, delegates: Vec<UserId>) -> Self {
        self.can_delegate = true;
        self.delegates = delegates;
        self
    }

    pub fn with_allowed_users(mut self, users: Vec<UserId>) -> Self {
        self.allowed_users = users;
        self
    }

    pub fn with_max_error_count(mut self, max: u64) -> Self {
        self.max_error_count = Some(max);
        self
    }

    pub fn with_max_amount(mut self, max: f64) -> Self {
        self.max_amount = Some(max);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Quorum for this row; a configured zero still means one approver
    pub fn quorum(&self) -> u32 {
        self.min_approvers.max(1)
    }
}

/// The effective set of people who may act for one role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverPool {
    /// Explicitly listed users
    Users(Vec<UserId>),
    /// Anyone the identity boundary says holds the role
    AnyHolderOf(RoleId),
    /// Delegates standing in for an unavailable primary pool
    Delegates(Vec<UserId>),
}

impl ApproverPool {
    /// Whether an actor belongs to this pool
    pub fn contains(&self, actor: &Actor) -> bool {
        match self {
            Self::Users(users) | Self::Delegates(users) => users.contains(&actor.id),
            Self::AnyHolderOf(role) => actor.has_role(role),
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegates(_))
    }
}

/// Resolved authority for one role at one level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub role: RoleId,
    pub quorum: u32,
    pub can_escalate: bool,
    pub max_error_count: Option<u64>,
    pub max_amount: Option<f64>,
    pub pool: ApproverPool,
}

impl RolePolicy {
    /// Whether the validation is within this role's authority ceilings
    pub fn within_authority(&self, validation: &ValidationSnapshot) -> bool {
        let errors_ok = self
            .max_error_count
            .map_or(true, |max| validation.error_count <= max);
        let amount_ok = match (self.max_amount, validation.amount) {
            (Some(max), Some(amount)) => amount <= max,
            _ => true,
        };
        errors_ok && amount_ok
    }
}

/// Who may act on an approval at a given level
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApproverPolicy {
    pub level: Level,
    pub roles: Vec<RolePolicy>,
}

impl ApproverPolicy {
    /// The smallest per-role quorum at this level. Each role is still held
    /// to its own quorum when votes are counted.
    pub fn quorum(&self) -> u32 {
        self.roles.iter().map(|r| r.quorum).min().unwrap_or(1)
    }

    /// Role policies under which `actor` may resolve `validation`
    pub fn authorizing_roles<'a>(
        &'a self,
        actor: &'a Actor,
        validation: &'a ValidationSnapshot,
    ) -> impl Iterator<Item = &'a RolePolicy> + 'a {
        self.roles
            .iter()
            .filter(move |r| r.pool.contains(actor) && r.within_authority(validation))
    }

    pub fn authorizes(&self, actor: &Actor, validation: &ValidationSnapshot) -> bool {
        self.authorizing_roles(actor, validation).next().is_some()
    }
}
