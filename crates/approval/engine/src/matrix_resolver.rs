//! Approval matrix resolver: who may act on an approval at a level
//!
//! Resolution turns the enabled matrix rows of one level into an
//! [`ApproverPolicy`]. Who holds a role in which tenant, and whether anyone
//! in a pool can take work right now, are identity concerns answered by an
//! [`ApproverDirectory`].

use approval_types::{
    Actor, ApprovalError, ApprovalResult, ApproverPolicy, ApproverPool, Level, MatrixEntry,
    RoleId, RolePolicy, TenantId, UserId, ValidationSnapshot,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ── Directory boundary ───────────────────────────────────────────────

/// Role membership and availability of approvers, as reported by the
/// identity boundary
pub trait ApproverDirectory: Send + Sync {
    /// Whether `user` holds `role` inside `tenant`
    fn holds_role(&self, tenant: &TenantId, role: &RoleId, user: &UserId) -> bool;

    /// Whether at least one holder of `role` in `tenant` can take work
    fn has_available_holder(&self, tenant: &TenantId, role: &RoleId) -> bool;

    /// Whether a specific user in `tenant` can take work
    fn is_available(&self, tenant: &TenantId, user: &UserId) -> bool;
}

/// Directory that reports everyone as available.
///
/// Role membership is whatever the actor carries; tenant scoping then
/// relies on the actor's own tenant binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenDirectory;

impl ApproverDirectory for OpenDirectory {
    fn holds_role(&self, _tenant: &TenantId, _role: &RoleId, _user: &UserId) -> bool {
        true
    }

    fn has_available_holder(&self, _tenant: &TenantId, _role: &RoleId) -> bool {
        true
    }

    fn is_available(&self, _tenant: &TenantId, _user: &UserId) -> bool {
        true
    }
}

/// Directory backed by a fixed role table
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    holders: HashMap<(TenantId, RoleId), Vec<UserId>>,
    unavailable: HashSet<(TenantId, UserId)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holder(mut self, tenant: &str, role: &str, user: &str) -> Self {
        self.add_holder(TenantId::new(tenant), RoleId::new(role), UserId::new(user));
        self
    }

    pub fn add_holder(&mut self, tenant: TenantId, role: RoleId, user: UserId) {
        let users = self.holders.entry((tenant, role)).or_default();
        if !users.contains(&user) {
            users.push(user);
        }
    }

    /// Mark a user as out of office
    pub fn set_unavailable(&mut self, tenant: &str, user: &str) {
        self.unavailable
            .insert((TenantId::new(tenant), UserId::new(user)));
    }

    pub fn holders(&self, tenant: &TenantId, role: &RoleId) -> &[UserId] {
        self.holders
            .get(&(tenant.clone(), role.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl ApproverDirectory for StaticDirectory {
    fn holds_role(&self, tenant: &TenantId, role: &RoleId, user: &UserId) -> bool {
        self.holders(tenant, role).contains(user)
    }

    fn has_available_holder(&self, tenant: &TenantId, role: &RoleId) -> bool {
        self.holders(tenant, role)
            .iter()
            .any(|u| self.is_available(tenant, u))
    }

    fn is_available(&self, tenant: &TenantId, user: &UserId) -> bool {
        !self.unavailable.contains(&(tenant.clone(), user.clone()))
    }
}

// ── Resolver ─────────────────────────────────────────────────────────

/// Resolves matrix rows into approver policies
#[derive(Clone)]
pub struct ApprovalMatrixResolver {
    directory: Arc<dyn ApproverDirectory>,
}

impl std::fmt::Debug for ApprovalMatrixResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalMatrixResolver").finish_non_exhaustive()
    }
}

impl ApprovalMatrixResolver {
    pub fn new(directory: Arc<dyn ApproverDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the policy for `level`, taking availability into account.
    ///
    /// Each enabled row contributes its primary pool (allow-list, or any
    /// holder of the role) when someone in it is available. Otherwise its
    /// delegates stand in if the row permits delegation. A row with
    /// neither is dropped; a level left with no rows fails with
    /// `NoEligibleApprover`.
    pub fn resolve(
        &self,
        tenant: &TenantId,
        level: Level,
        entries: &[MatrixEntry],
    ) -> ApprovalResult<ApproverPolicy> {
        let rows: Vec<&MatrixEntry> = Self::rows_at(level, entries).collect();
        if rows.is_empty() {
            return Err(ApprovalError::NoEligibleApprover {
                level,
                reason: "no enabled matrix entry for this level".into(),
            });
        }

        let mut roles = Vec::with_capacity(rows.len());
        for entry in rows {
            let primary = Self::primary_pool(entry);
            if self.pool_available(tenant, &primary) {
                roles.push(Self::role_policy(entry, primary));
            } else if entry.can_delegate && !entry.delegates.is_empty() {
                tracing::debug!(
                    tenant = %tenant,
                    level = %level,
                    role = %entry.required_role,
                    "Primary pool unavailable, using delegates"
                );
                roles.push(Self::role_policy(
                    entry,
                    ApproverPool::Delegates(entry.delegates.clone()),
                ));
            } else {
                tracing::debug!(
                    tenant = %tenant,
                    level = %level,
                    role = %entry.required_role,
                    "No available approver for role"
                );
            }
        }

        if roles.is_empty() {
            return Err(ApprovalError::NoEligibleApprover {
                level,
                reason: "no available primary approver and no permitted delegate".into(),
            });
        }
        Ok(ApproverPolicy { level, roles })
    }

    /// Everyone who holds authority at `level`, regardless of availability.
    ///
    /// Used to authorize an actor who is already acting on an approval:
    /// primary pools plus, where delegation is permitted, the delegates.
    pub fn authority(level: Level, entries: &[MatrixEntry]) -> ApproverPolicy {
        let mut roles = Vec::new();
        for entry in Self::rows_at(level, entries) {
            roles.push(Self::role_policy(entry, Self::primary_pool(entry)));
            if entry.can_delegate && !entry.delegates.is_empty() {
                roles.push(Self::role_policy(
                    entry,
                    ApproverPool::Delegates(entry.delegates.clone()),
                ));
            }
        }
        ApproverPolicy { level, roles }
    }

    /// Role policies under which `actor` may act on an approval of
    /// `tenant` at `level`.
    ///
    /// An actor bound to another tenant gets nothing. Role-based pools are
    /// confirmed against the directory for `tenant`, so a role held in
    /// another tenant grants no authority here.
    pub fn authorizing_roles(
        &self,
        tenant: &TenantId,
        level: Level,
        entries: &[MatrixEntry],
        actor: &Actor,
        validation: &ValidationSnapshot,
    ) -> Vec<RolePolicy> {
        if !actor.belongs_to(tenant) {
            return Vec::new();
        }
        Self::authority(level, entries)
            .roles
            .into_iter()
            .filter(|r| r.pool.contains(actor) && r.within_authority(validation))
            .filter(|r| match &r.pool {
                ApproverPool::AnyHolderOf(role) => self.directory.holds_role(tenant, role, &actor.id),
                ApproverPool::Users(_) | ApproverPool::Delegates(_) => true,
            })
            .collect()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn rows_at(level: Level, entries: &[MatrixEntry]) -> impl Iterator<Item = &MatrixEntry> {
        entries.iter().filter(move |e| e.enabled && e.level == level)
    }

    fn primary_pool(entry: &MatrixEntry) -> ApproverPool {
        if entry.allowed_users.is_empty() {
            ApproverPool::AnyHolderOf(entry.required_role.clone())
        } else {
            ApproverPool::Users(entry.allowed_users.clone())
        }
    }

    fn pool_available(&self, tenant: &TenantId, pool: &ApproverPool) -> bool {
        match pool {
            ApproverPool::AnyHolderOf(role) => self.directory.has_available_holder(tenant, role),
            ApproverPool::Users(users) | ApproverPool::Delegates(users) => {
                users.iter().any(|u| self.directory.is_available(tenant, u))
            }
        }
    }

    fn role_policy(entry: &MatrixEntry, pool: ApproverPool) -> RolePolicy {
        RolePolicy {
            role: entry.required_role.clone(),
            quorum: entry.quorum(),
            can_escalate: entry.can_escalate,
            max_error_count: entry.max_error_count,
            max_amount: entry.max_amount,
            pool,
        }
    }
}
