//! Approval engine: the entry point for everything that happens to an
//! approval
//!
//! Every mutation follows the same path: read the instance, check the
//! actor's authority at the instance's level, apply the transition on the
//! aggregate, then write it back with a compare-and-set. Events go out only
//! after the write has landed.

use crate::{
    ApprovalMatrixResolver, ApproverDirectory, Clock, EngineConfig, EscalationManager,
    EventPublisher, InstanceStore, SlaMonitor, StatsAggregator, TemplateRegistry,
    WorkflowSelector,
};
use approval_types::{
    Actor, ApprovalError, ApprovalEvent, ApprovalEventEnvelope, ApprovalInstance,
    ApprovalRequest, ApprovalResult, ApprovalStatus, ApproverPolicy, InstanceId,
    RejectionBehavior, RolePolicy, TemplateId, TenantId, VoteOutcome, WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// An escalated instance and the successor that replaced it
#[derive(Clone, Debug, PartialEq)]
pub struct Escalation {
    pub original: ApprovalInstance,
    pub successor: ApprovalInstance,
}

/// What a rejection turned into
#[derive(Clone, Debug, PartialEq)]
pub enum RejectOutcome {
    /// The workflow ended
    Rejected(ApprovalInstance),
    /// The template routes rejections upward
    Escalated(Escalation),
}

/// Approval workflow engine
pub struct ApprovalEngine {
    config: EngineConfig,
    registry: Arc<TemplateRegistry>,
    store: Arc<dyn InstanceStore>,
    resolver: ApprovalMatrixResolver,
    escalations: EscalationManager,
    selector: WorkflowSelector,
    stats: StatsAggregator,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl ApprovalEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn InstanceStore>,
        directory: Arc<dyn ApproverDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(TemplateRegistry::new());
        let resolver = ApprovalMatrixResolver::new(directory);
        let escalations = EscalationManager::new(resolver.clone(), config.max_escalation_chain);
        Self {
            events: EventPublisher::new(config.event_channel_capacity),
            stats: StatsAggregator::new(registry.clone()),
            selector: WorkflowSelector::new(),
            config,
            registry,
            store,
            resolver,
            escalations,
            clock,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEventEnvelope> {
        self.events.subscribe()
    }

    /// An SLA monitor sharing this engine's store, clock and event stream
    pub fn sla_monitor(&self) -> SlaMonitor {
        SlaMonitor::new(
            self.store.clone(),
            self.escalations.clone(),
            self.events.clone(),
            self.clock.clone(),
            &self.config,
        )
    }

    // ── Templates ────────────────────────────────────────────────────

    pub async fn register_template(&self, template: WorkflowTemplate) -> ApprovalResult<TemplateId> {
        self.registry.register(template).await
    }

    // ── Starting approvals ───────────────────────────────────────────

    /// Route a validation to its workflow and open the first approval.
    ///
    /// Fails with `NoMatchingWorkflow` when no Active template of the
    /// tenant matches; the caller decides on a fallback, typically via
    /// [`ApprovalEngine::start_approval_with`].
    pub async fn start_approval(&self, request: ApprovalRequest) -> ApprovalResult<ApprovalInstance> {
        let candidates = self
            .registry
            .active_for_tenant(&request.validation.tenant_id)
            .await;
        let compiled = self
            .selector
            .select(&request.validation, &candidates)
            .ok_or_else(|| ApprovalError::NoMatchingWorkflow(request.validation.id.to_string()))?;
        self.open(&compiled.template, request).await
    }

    /// Open the first approval under an explicitly chosen template
    pub async fn start_approval_with(
        &self,
        template_id: &TemplateId,
        request: ApprovalRequest,
    ) -> ApprovalResult<ApprovalInstance> {
        let compiled = self.registry.get_compiled(template_id).await?;
        let template = &compiled.template;
        if !template.is_active() {
            return Err(ApprovalError::not_allowed(
                "start approval",
                format!("template '{}' v{} is not active", template.code, template.version),
            ));
        }
        if template.tenant_id != request.validation.tenant_id {
            return Err(ApprovalError::TemplateNotFound(template_id.clone()));
        }
        self.open(template, request).await
    }

    /// The eligible-approver policy for an instance's current level, for
    /// the assignment boundary
    pub async fn approver_policy(&self, id: &InstanceId) -> ApprovalResult<ApproverPolicy> {
        let instance = self.load(id).await?;
        self.resolver
            .resolve(&instance.tenant_id, instance.level, &instance.policy.matrix)
    }

    // ── Transitions ──────────────────────────────────────────────────

    pub async fn assign(&self, id: &InstanceId, assignee: &Actor) -> ApprovalResult<ApprovalInstance> {
        let (saved, now) = self
            .mutate(id, |instance, now| {
                self.authorize(instance, assignee)?;
                instance.assign(assignee, now)
            })
            .await?;

        tracing::info!(instance_id = %saved.id, assignee = %assignee.id, "Approval assigned");
        self.events.emit(
            &saved.tenant_id,
            Some(&assignee.id),
            ApprovalEvent::ApprovalAssigned {
                instance_id: saved.id.clone(),
                assignee: assignee.id.clone(),
            },
            now,
        );
        Ok(saved)
    }

    /// Record an approval vote; resolves the instance once the quorum is met
    pub async fn approve(
        &self,
        id: &InstanceId,
        approver: &Actor,
        notes: Option<String>,
    ) -> ApprovalResult<ApprovalInstance> {
        let mut outcome = None;
        let (saved, now) = self
            .mutate(id, |instance, now| {
                let authority = self.authorize(instance, approver)?;
                outcome = Some(instance.approve(approver, &authority, notes, now)?);
                Ok(())
            })
            .await?;

        match outcome {
            Some(VoteOutcome::Recorded { votes, quorum }) => {
                tracing::info!(instance_id = %saved.id, approver = %approver.id, votes, quorum, "Approval vote recorded");
                self.events.emit(
                    &saved.tenant_id,
                    Some(&approver.id),
                    ApprovalEvent::ApprovalVoteRecorded {
                        instance_id: saved.id.clone(),
                        approver: approver.id.clone(),
                        votes,
                        quorum,
                    },
                    now,
                );
            }
            _ => {
                tracing::info!(instance_id = %saved.id, approver = %approver.id, level = %saved.level, "Approval granted");
                self.events.emit(
                    &saved.tenant_id,
                    Some(&approver.id),
                    ApprovalEvent::ApprovalGranted {
                        instance_id: saved.id.clone(),
                        validation_id: saved.validation.id.clone(),
                        approver: approver.id.clone(),
                    },
                    now,
                );
                self.record_outcome(&saved).await;
            }
        }
        Ok(saved)
    }

    /// Reject, or escalate when the template routes rejections upward and
    /// a higher level exists
    pub async fn reject(
        &self,
        id: &InstanceId,
        rejected_by: &Actor,
        reason: &str,
        notes: Option<String>,
    ) -> ApprovalResult<RejectOutcome> {
        let mut instance = self.load(id).await?;
        self.authorize(&instance, rejected_by)?;
        instance.ensure_can_reject(reason)?;

        let policy = &instance.policy;
        let routes_upward = policy.rejection_behavior == RejectionBehavior::Escalate
            && policy.allow_escalation
            && policy.escalation_permitted_at(instance.level);
        if routes_upward {
            match self.escalations.plan(&instance) {
                Ok(_) => {
                    instance.reject_upward(rejected_by, reason, notes, self.clock.now())?;
                    let reason = format!("Rejected: {}", reason.trim());
                    let escalation = self
                        .escalate_loaded(instance, rejected_by, &reason)
                        .await?;
                    return Ok(RejectOutcome::Escalated(escalation));
                }
                Err(ApprovalError::OperationNotAllowed { reason: why, .. }) => {
                    tracing::debug!(instance_id = %id, reason = %why, "Rejection cannot escalate, ending workflow");
                }
                Err(e) => return Err(e),
            }
        }

        let expected = instance.version;
        let now = self.clock.now();
        instance.reject(rejected_by, reason, notes, now)?;
        let saved = self.store.update(instance, expected).await?;

        tracing::info!(instance_id = %saved.id, rejected_by = %rejected_by.id, "Approval rejected");
        self.events.emit(
            &saved.tenant_id,
            Some(&rejected_by.id),
            ApprovalEvent::ApprovalRejected {
                instance_id: saved.id.clone(),
                validation_id: saved.validation.id.clone(),
                rejected_by: rejected_by.id.clone(),
                reason: saved.rejection_reason.clone(),
            },
            now,
        );
        self.record_outcome(&saved).await;
        Ok(RejectOutcome::Rejected(saved))
    }

    pub async fn request_more_info(
        &self,
        id: &InstanceId,
        requested_by: &Actor,
        info_required: &str,
    ) -> ApprovalResult<ApprovalInstance> {
        let (saved, now) = self
            .mutate(id, |instance, now| {
                self.authorize(instance, requested_by)?;
                instance.request_more_info(requested_by, info_required, now)
            })
            .await?;

        tracing::info!(instance_id = %saved.id, requested_by = %requested_by.id, "More information requested");
        self.events.emit(
            &saved.tenant_id,
            Some(&requested_by.id),
            ApprovalEvent::MoreInfoRequested {
                instance_id: saved.id.clone(),
                requested_by: requested_by.id.clone(),
                info_required: info_required.trim().to_string(),
            },
            now,
        );
        Ok(saved)
    }

    pub async fn provide_info(
        &self,
        id: &InstanceId,
        provided_by: &Actor,
        information: &str,
    ) -> ApprovalResult<ApprovalInstance> {
        let (saved, now) = self
            .mutate(id, |instance, now| {
                instance.provide_info(provided_by, information, now)
            })
            .await?;

        tracing::info!(instance_id = %saved.id, provided_by = %provided_by.id, "Requested information provided");
        self.events.emit(
            &saved.tenant_id,
            Some(&provided_by.id),
            ApprovalEvent::InfoProvided {
                instance_id: saved.id.clone(),
                provided_by: provided_by.id.clone(),
            },
            now,
        );
        Ok(saved)
    }

    /// Manually hand an approval to the next level
    pub async fn escalate(
        &self,
        id: &InstanceId,
        escalated_by: &Actor,
        reason: &str,
    ) -> ApprovalResult<Escalation> {
        let instance = self.load(id).await?;
        self.authorize(&instance, escalated_by)?;
        self.escalate_loaded(instance, escalated_by, reason).await
    }

    pub async fn cancel(
        &self,
        id: &InstanceId,
        cancelled_by: &Actor,
        reason: &str,
    ) -> ApprovalResult<ApprovalInstance> {
        let (saved, now) = self
            .mutate(id, |instance, now| instance.cancel(cancelled_by, reason, now))
            .await?;

        tracing::info!(instance_id = %saved.id, cancelled_by = %cancelled_by.id, "Approval cancelled");
        self.events.emit(
            &saved.tenant_id,
            Some(&cancelled_by.id),
            ApprovalEvent::ApprovalCancelled {
                instance_id: saved.id.clone(),
                reason: reason.to_string(),
            },
            now,
        );
        self.record_outcome(&saved).await;
        Ok(saved)
    }

    /// Comment on an approval in any state
    pub async fn add_comment(
        &self,
        id: &InstanceId,
        author: &Actor,
        text: &str,
        internal: bool,
    ) -> ApprovalResult<ApprovalInstance> {
        let (saved, now) = self
            .mutate(id, |instance, now| {
                instance.add_comment(author, text, internal, now)
            })
            .await?;

        self.events.emit(
            &saved.tenant_id,
            Some(&author.id),
            ApprovalEvent::CommentAdded {
                instance_id: saved.id.clone(),
                author: author.id.clone(),
                internal,
            },
            now,
        );
        Ok(saved)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get(&self, id: &InstanceId) -> ApprovalResult<ApprovalInstance> {
        self.load(id).await
    }

    pub async fn list(
        &self,
        tenant: &TenantId,
        status: Option<ApprovalStatus>,
    ) -> ApprovalResult<Vec<ApprovalInstance>> {
        Ok(self.store.query(tenant, status).await?)
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn open(
        &self,
        template: &WorkflowTemplate,
        request: ApprovalRequest,
    ) -> ApprovalResult<ApprovalInstance> {
        let first = template.first_step().ok_or_else(|| {
            ApprovalError::ConfigurationError(format!("template '{}' has no steps", template.code))
        })?;
        let level = first.level;
        let policy = self
            .resolver
            .resolve(&template.tenant_id, level, &template.matrix)?;

        let now = self.clock.now();
        let requester = request.requester.id.clone();
        let instance =
            ApprovalInstance::create(request, template.snapshot(), level, policy.quorum(), now)?;
        let saved = self.store.create(instance).await?;

        tracing::info!(
            instance_id = %saved.id,
            tenant = %saved.tenant_id,
            template = %template.code,
            version = template.version,
            level = %level,
            quorum = saved.quorum,
            "Approval requested"
        );
        self.events.emit(
            &saved.tenant_id,
            Some(&requester),
            ApprovalEvent::ApprovalRequested {
                instance_id: saved.id.clone(),
                validation_id: saved.validation.id.clone(),
                template_id: saved.template_id().clone(),
                level,
                due_date: saved.due_date,
            },
            now,
        );
        Ok(saved)
    }

    async fn escalate_loaded(
        &self,
        mut instance: ApprovalInstance,
        escalated_by: &Actor,
        reason: &str,
    ) -> ApprovalResult<Escalation> {
        let expected = instance.version;
        let now = self.clock.now();
        let successor = self
            .escalations
            .escalate(&mut instance, reason, escalated_by, now)?;
        let (original, successor) = self
            .store
            .commit_escalation(instance, expected, successor)
            .await?;

        self.events.emit(
            &original.tenant_id,
            Some(&escalated_by.id),
            ApprovalEvent::ApprovalEscalated {
                original_id: original.id.clone(),
                successor_id: successor.id.clone(),
                from_level: original.level,
                to_level: successor.level,
                reason: reason.to_string(),
            },
            now,
        );
        self.events.emit(
            &successor.tenant_id,
            Some(&escalated_by.id),
            ApprovalEvent::ApprovalRequested {
                instance_id: successor.id.clone(),
                validation_id: successor.validation.id.clone(),
                template_id: successor.template_id().clone(),
                level: successor.level,
                due_date: successor.due_date,
            },
            now,
        );
        Ok(Escalation {
            original,
            successor,
        })
    }

    async fn load(&self, id: &InstanceId) -> ApprovalResult<ApprovalInstance> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ApprovalError::InstanceNotFound(id.clone()))
    }

    /// Read, apply `f`, compare-and-set. Returns the stored copy and the
    /// instant the transition was stamped with.
    async fn mutate<F>(
        &self,
        id: &InstanceId,
        f: F,
    ) -> ApprovalResult<(ApprovalInstance, DateTime<Utc>)>
    where
        F: FnOnce(&mut ApprovalInstance, DateTime<Utc>) -> ApprovalResult<()>,
    {
        let mut instance = self.load(id).await?;
        let expected = instance.version;
        let now = self.clock.now();
        f(&mut instance, now)?;
        let saved = self.store.update(instance, expected).await?;
        Ok((saved, now))
    }

    /// The roles under which `actor` may act on `instance`, scoped to the
    /// instance's tenant. Empty means not authorized.
    fn authorize(
        &self,
        instance: &ApprovalInstance,
        actor: &Actor,
    ) -> ApprovalResult<Vec<RolePolicy>> {
        let roles = self.resolver.authorizing_roles(
            &instance.tenant_id,
            instance.level,
            &instance.policy.matrix,
            actor,
            &instance.validation,
        );
        if roles.is_empty() {
            return Err(ApprovalError::NotAuthorized(format!(
                "{} may not act on approval {} at level {}",
                actor.id,
                instance.id.short(),
                instance.level
            )));
        }
        Ok(roles)
    }

    async fn record_outcome(&self, instance: &ApprovalInstance) {
        if let Err(e) = self.stats.record_outcome(instance).await {
            tracing::warn!(instance_id = %instance.id, error = %e, "Could not update template statistics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryInstanceStore, ManualClock, OpenDirectory, StaticDirectory};
    use approval_types::{
        ConditionOperator, ConditionType, HistoryAction, Level, MatrixEntry, RoleId,
        RoutingRule, ValidationSnapshot, WorkflowStep,
    };
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn template() -> WorkflowTemplate {
        let mut t = WorkflowTemplate::new(TenantId::new("acme"), "errors", "Errors")
            .with_sla_hours(24, 8)
            .with_escalation()
            .requiring_reject_comments();
        t.add_step(WorkflowStep::new(1, Level(1))).unwrap();
        t.add_step(WorkflowStep::new(2, Level(2))).unwrap();
        t.add_matrix_entry(
            MatrixEntry::new(Level(1), RoleId::new("supervisor"))
                .escalatable()
                .with_max_error_count(100),
        )
        .unwrap();
        t.add_matrix_entry(MatrixEntry::new(Level(2), RoleId::new("manager")))
            .unwrap();
        t.add_rule(RoutingRule::new(
            ConditionType::ErrorCount,
            ConditionOperator::GreaterThan,
            "5",
        ));
        t.status = approval_types::TemplateStatus::Active;
        t
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_holder("acme", "supervisor", "dana")
            .with_holder("acme", "manager", "morgan")
    }

    fn engine_with(directory: Arc<dyn ApproverDirectory>) -> ApprovalEngine {
        ApprovalEngine::new(
            EngineConfig::default(),
            Arc::new(InMemoryInstanceStore::new()),
            directory,
            Arc::new(ManualClock::new(t0())),
        )
    }

    fn engine() -> ApprovalEngine {
        engine_with(Arc::new(directory()))
    }

    fn request(errors: u64) -> ApprovalRequest {
        ApprovalRequest::new(
            ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(errors),
            Actor::new("req", "Requester"),
            "validation failed",
        )
    }

    fn dana() -> Actor {
        Actor::new("dana", "Dana").with_role("supervisor")
    }

    fn morgan() -> Actor {
        Actor::new("morgan", "Morgan").with_role("manager")
    }

    #[tokio::test]
    async fn test_start_routes_to_matching_template() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();

        let inst = engine.start_approval(request(12)).await.unwrap();
        assert_eq!(inst.level, Level(1));
        assert_eq!(inst.status, ApprovalStatus::Pending);
        assert_eq!(inst.due_date, t0() + Duration::hours(24));

        let err = engine.start_approval(request(2)).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NoMatchingWorkflow(_)));
    }

    #[tokio::test]
    async fn test_start_with_explicit_template() {
        let engine = engine();
        let mut t = template();
        t.rules.clear();
        let id = engine.register_template(t).await.unwrap();
        let inst = engine.start_approval_with(&id, request(2)).await.unwrap();
        assert_eq!(inst.template_id(), &id);
    }

    #[tokio::test]
    async fn test_full_approval_flow() {
        let engine = engine();
        let template_id = engine.register_template(template()).await.unwrap();
        let mut rx = engine.subscribe();

        let inst = engine.start_approval(request(12)).await.unwrap();
        engine.assign(&inst.id, &dana()).await.unwrap();
        let approved = engine
            .approve(&inst.id, &dana(), Some("ok".into()))
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let stats = engine.registry().get(&template_id).await.unwrap().stats;
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.success_count, 1);

        let names: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event.name())
            .collect();
        assert_eq!(
            names,
            vec!["approval_requested", "approval_assigned", "approval_granted"]
        );
    }

    #[tokio::test]
    async fn test_outsider_cannot_approve() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        engine.assign(&inst.id, &dana()).await.unwrap();

        let err = engine
            .approve(&inst.id, &Actor::new("pat", "Pat"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_role_held_in_another_tenant_grants_nothing() {
        let engine = engine_with(Arc::new(
            directory().with_holder("globex", "supervisor", "pat"),
        ));
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        let pat = Actor::new("pat", "Pat").with_role("supervisor");

        let err = engine.assign(&inst.id, &pat).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));

        engine.assign(&inst.id, &dana()).await.unwrap();
        let err = engine.approve(&inst.id, &pat, None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));
        let err = engine
            .reject(&inst.id, &pat, "not mine", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));

        let stored = engine.get(&inst.id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::InReview);
        assert!(stored.votes.is_empty());
    }

    #[tokio::test]
    async fn test_actor_bound_to_another_tenant_is_refused() {
        let engine = engine_with(Arc::new(OpenDirectory));
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();

        let foreign = dana().in_tenant("globex");
        let err = engine.assign(&inst.id, &foreign).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));

        let local = dana().in_tenant("acme");
        engine.assign(&inst.id, &local).await.unwrap();
        let approved = engine.approve(&inst.id, &local, None).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_mixed_roles_each_keep_their_quorum() {
        let engine = engine_with(Arc::new(
            directory()
                .with_holder("acme", "supervisor", "lee")
                .with_holder("acme", "lead", "kim"),
        ));
        let mut t = template();
        t.matrix[0].min_approvers = 2;
        t.add_matrix_entry(MatrixEntry::new(Level(1), RoleId::new("lead")))
            .unwrap();
        engine.register_template(t).await.unwrap();
        let mut rx = engine.subscribe();

        // One supervisor is not enough, even though a lead alone would be
        let inst = engine.start_approval(request(12)).await.unwrap();
        assert_eq!(inst.quorum, 1);
        engine.assign(&inst.id, &dana()).await.unwrap();
        let first = engine.approve(&inst.id, &dana(), None).await.unwrap();
        assert_eq!(first.status, ApprovalStatus::InReview);

        let lee = Actor::new("lee", "Lee").with_role("supervisor");
        let second = engine.approve(&inst.id, &lee, None).await.unwrap();
        assert_eq!(second.status, ApprovalStatus::Approved);

        let votes: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e.event {
                ApprovalEvent::ApprovalVoteRecorded { votes, quorum, .. } => Some((votes, quorum)),
                _ => None,
            })
            .collect();
        assert_eq!(votes, vec![(1, 2)]);

        // A lead resolves a fresh approval on their own
        let other = engine.start_approval(request(12)).await.unwrap();
        let kim = Actor::new("kim", "Kim").with_role("lead");
        engine.assign(&other.id, &kim).await.unwrap();
        let done = engine.approve(&other.id, &kim, None).await.unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
        assert_eq!(done.votes[0].role, RoleId::new("lead"));
    }

    #[tokio::test]
    async fn test_authority_ceiling_blocks_approval() {
        let engine = engine();
        let mut t = template();
        t.rules.clear();
        let id = engine.register_template(t).await.unwrap();
        let inst = engine.start_approval_with(&id, request(500)).await.unwrap();

        let err = engine.assign(&inst.id, &dana()).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        engine.assign(&inst.id, &dana()).await.unwrap();

        let err = engine.reject(&inst.id, &dana(), "", None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::ValidationError(_)));

        let outcome = engine
            .reject(&inst.id, &dana(), "totals wrong", None)
            .await
            .unwrap();
        let RejectOutcome::Rejected(rejected) = outcome else {
            panic!("expected a plain rejection");
        };
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn test_reject_escalates_when_configured() {
        let engine = engine();
        let t = template().with_rejection_behavior(RejectionBehavior::Escalate);
        engine.register_template(t).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        engine.assign(&inst.id, &dana()).await.unwrap();

        let outcome = engine
            .reject(
                &inst.id,
                &dana(),
                "over my limit",
                Some("numbers look off in March".into()),
            )
            .await
            .unwrap();
        let RejectOutcome::Escalated(escalation) = outcome else {
            panic!("expected an escalation");
        };
        assert_eq!(escalation.successor.level, Level(2));
        assert!(escalation
            .successor
            .request_reason
            .contains("Rejected: over my limit"));

        // The rejection itself stays on the escalated original
        let original = engine.get(&inst.id).await.unwrap();
        assert_eq!(original, escalation.original);
        assert_eq!(original.status, ApprovalStatus::Escalated);
        assert_eq!(original.rejection_reason.as_deref(), Some("over my limit"));
        assert_eq!(
            original.resolution_notes.as_deref(),
            Some("numbers look off in March")
        );
        let actions: Vec<_> = original.history().iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Requested,
                HistoryAction::Assigned,
                HistoryAction::Rejected,
                HistoryAction::Escalated,
            ]
        );

        // The successor belongs to the manager level now
        let successor = escalation.successor;
        engine.assign(&successor.id, &morgan()).await.unwrap();
        let approved = engine.approve(&successor.id, &morgan(), None).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_more_info_then_approve() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        engine.assign(&inst.id, &dana()).await.unwrap();

        engine
            .request_more_info(&inst.id, &dana(), "attach the source file")
            .await
            .unwrap();
        let requester = Actor::new("req", "Requester");
        let back = engine
            .provide_info(&inst.id, &requester, "attached")
            .await
            .unwrap();
        assert_eq!(back.status, ApprovalStatus::InReview);

        let approved = engine.approve(&inst.id, &dana(), None).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        let actions: Vec<_> = approved.history().iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Requested,
                HistoryAction::Assigned,
                HistoryAction::MoreInfoRequested,
                HistoryAction::InfoProvided,
                HistoryAction::Approved,
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_escalation_and_cancel() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();

        let escalation = engine
            .escalate(&inst.id, &dana(), "needs a manager")
            .await
            .unwrap();
        assert_eq!(escalation.successor.priority, 2);

        // The escalated original is closed for good
        let err = engine
            .cancel(&inst.id, &Actor::new("req", "Requester"), "withdrawn")
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidStateTransition { .. }));

        let cancelled = engine
            .cancel(&escalation.successor.id, &Actor::new("req", "Requester"), "withdrawn")
            .await
            .unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);

        // Comments are still allowed on terminal instances
        let commented = engine
            .add_comment(&inst.id, &dana(), "for the record", true)
            .await
            .unwrap();
        assert_eq!(commented.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_approver_policy_exposed() {
        let engine = engine();
        engine.register_template(template()).await.unwrap();
        let inst = engine.start_approval(request(12)).await.unwrap();
        let policy = engine.approver_policy(&inst.id).await.unwrap();
        assert_eq!(policy.level, Level(1));
        assert_eq!(policy.roles[0].role, RoleId::new("supervisor"));
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let engine = engine();
        let err = engine.get(&InstanceId::new("missing")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::InstanceNotFound(_)));
    }
}
