//! Escalation manager: moves an approval up to the next level
//!
//! Before anything is mutated, the manager checks that a higher level is
//! configured, that someone there can take the work, and that the chain has
//! room for another link. Only then does the instance mark itself Escalated
//! and produce its successor. A failed escalation leaves the original open.

use crate::ApprovalMatrixResolver;
use approval_types::{
    Actor, ApprovalError, ApprovalInstance, ApprovalResult, ApproverPolicy, Level,
};
use chrono::{DateTime, Utc};

/// Where an escalation would land
#[derive(Clone, Debug, PartialEq)]
pub struct EscalationPlan {
    pub next_level: Level,
    pub policy: ApproverPolicy,
}

/// Creates successor instances on escalation
#[derive(Clone, Debug)]
pub struct EscalationManager {
    resolver: ApprovalMatrixResolver,
    max_chain: u32,
}

impl EscalationManager {
    pub fn new(resolver: ApprovalMatrixResolver, max_chain: u32) -> Self {
        Self {
            resolver,
            max_chain,
        }
    }

    /// Work out where `instance` would escalate to, without touching it
    pub fn plan(&self, instance: &ApprovalInstance) -> ApprovalResult<EscalationPlan> {
        if !instance.is_open() {
            return Err(ApprovalError::InvalidStateTransition {
                action: "escalate",
                from: instance.status,
            });
        }
        if instance.escalation_depth + 1 > self.max_chain {
            return Err(ApprovalError::not_allowed(
                "escalate",
                format!("escalation chain limit of {} reached", self.max_chain),
            ));
        }

        let next_level = instance
            .policy
            .next_level(instance.level)
            .ok_or_else(|| ApprovalError::not_allowed("escalate", "no higher level configured"))?;
        let policy = self
            .resolver
            .resolve(&instance.tenant_id, next_level, &instance.policy.matrix)?;

        Ok(EscalationPlan { next_level, policy })
    }

    /// Escalate `instance` and return its successor.
    ///
    /// On success `instance` is Escalated. Persisting both is the caller's
    /// job, and must be a single compare-and-set.
    pub fn escalate(
        &self,
        instance: &mut ApprovalInstance,
        reason: &str,
        escalated_by: &Actor,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalInstance> {
        let plan = self.plan(instance)?;
        let successor = instance.escalate(
            reason,
            escalated_by,
            plan.next_level,
            plan.policy.quorum(),
            now,
        )?;

        tracing::info!(
            instance_id = %instance.id,
            successor_id = %successor.id,
            from_level = %instance.level,
            to_level = %successor.level,
            depth = successor.escalation_depth,
            reason,
            "Approval escalated"
        );
        Ok(successor)
    }
}
