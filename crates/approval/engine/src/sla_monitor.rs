//! SLA monitor: periodic sweep over open approvals
//!
//! Each sweep recomputes the SLA status of every open instance and
//! escalates breached ones where the policy says so. A breached instance
//! that could not be escalated stays open at its level and is retried on
//! the next sweep. The sweep is idempotent: a second pass at the same
//! instant changes nothing that the first pass could have changed.
//!
//! The monitor never trusts the list it started from. Each instance is
//! re-read right before it is touched, and every write is a
//! compare-and-set, so an approval resolved by a person mid-sweep is
//! either skipped or loses the race cleanly.

use crate::{Clock, EngineConfig, EscalationManager, EventPublisher, InstanceStore, StoreError};
use approval_types::{
    Actor, ApprovalError, ApprovalEvent, ApprovalInstance, ApprovalResult, InstanceId, SlaStatus,
    SlaTransition, TenantId, TimeoutBehavior,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Escalation reason recorded for breaches
pub const SLA_EXCEEDED: &str = "SLA exceeded";

/// A misconfiguration surfaced while sweeping
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurationIssue {
    pub instance_id: InstanceId,
    pub tenant_id: TenantId,
    pub error: ApprovalError,
}

/// Outcome of one sweep
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    pub scanned: usize,
    pub on_time: usize,
    pub at_risk: usize,
    pub breached: usize,
    pub newly_breached: usize,
    pub escalated: usize,
    /// Left the open states between listing and re-reading
    pub skipped: usize,
    /// Lost a compare-and-set to a concurrent writer
    pub conflicts: usize,
    /// Store errors while checking an instance; the sweep moved on
    pub failed: usize,
    pub configuration_errors: Vec<ConfigurationIssue>,
}

impl SweepReport {
    fn tally(&mut self, status: SlaStatus) {
        match status {
            SlaStatus::OnTime => self.on_time += 1,
            SlaStatus::AtRisk => self.at_risk += 1,
            SlaStatus::Breached => self.breached += 1,
        }
    }
}

/// Background SLA sweep
pub struct SlaMonitor {
    store: Arc<dyn InstanceStore>,
    escalations: EscalationManager,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
    at_risk_window: Duration,
    system: Actor,
}

impl SlaMonitor {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        escalations: EscalationManager,
        events: EventPublisher,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            escalations,
            events,
            clock,
            at_risk_window: config.at_risk_window(),
            system: Actor::system(config.system_actor.clone()),
        }
    }

    /// Sweep at the clock's current time
    pub async fn sweep(&self) -> ApprovalResult<SweepReport> {
        self.sweep_at(self.clock.now()).await
    }

    /// Sweep as if the time were `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> ApprovalResult<SweepReport> {
        let open = self.store.list_open().await?;
        let mut report = SweepReport::default();

        for candidate in open {
            report.scanned += 1;
            if let Err(e) = self.check(&candidate.id, now, &mut report).await {
                tracing::error!(
                    instance_id = %candidate.id,
                    tenant = %candidate.tenant_id,
                    error = %e,
                    "SLA check failed, continuing sweep"
                );
                report.failed += 1;
            }
        }

        if !report.configuration_errors.is_empty() || report.escalated > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                at_risk = report.at_risk,
                newly_breached = report.newly_breached,
                escalated = report.escalated,
                conflicts = report.conflicts,
                failed = report.failed,
                configuration_errors = report.configuration_errors.len(),
                "SLA sweep finished"
            );
        } else {
            tracing::debug!(
                scanned = report.scanned,
                at_risk = report.at_risk,
                breached = report.breached,
                "SLA sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `period` until `shutdown` flips to true or its sender
    /// goes away
    pub async fn run(self: Arc<Self>, period: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "SLA monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "SLA sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("SLA monitor stopped");
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn check(
        &self,
        id: &InstanceId,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> ApprovalResult<()> {
        let Some(mut instance) = self.store.get(id).await? else {
            report.skipped += 1;
            return Ok(());
        };
        if !instance.is_open() {
            tracing::debug!(instance_id = %id, status = ?instance.status, "Resolved since listing, skipped");
            report.skipped += 1;
            return Ok(());
        }

        let expected = instance.version;
        let transition = instance.refresh_sla(now, self.at_risk_window);
        report.tally(instance.sla_status);
        if let Some(t) = transition.filter(SlaTransition::is_new_breach) {
            report.newly_breached += 1;
            tracing::warn!(
                instance_id = %instance.id,
                tenant = %instance.tenant_id,
                level = %instance.level,
                due_date = %instance.due_date,
                from = ?t.from,
                "Approval SLA breached"
            );
        }

        // Breached and still open: either a fresh breach or an earlier
        // escalation attempt that failed
        if instance.sla_status == SlaStatus::Breached && Self::escalates_on_timeout(&instance) {
            match self
                .escalations
                .escalate(&mut instance, SLA_EXCEEDED, &self.system, now)
            {
                Ok(successor) => {
                    return match self
                        .store
                        .commit_escalation(instance, expected, successor)
                        .await
                    {
                        Ok((original, successor)) => {
                            report.escalated += 1;
                            match transition {
                                Some(t) => self.emit_sla(&original, t, now),
                                None => tracing::info!(
                                    instance_id = %original.id,
                                    "Escalation of breached approval succeeded on retry"
                                ),
                            }
                            self.emit_escalation(&original, &successor, now);
                            Ok(())
                        }
                        Err(StoreError::VersionConflict { .. }) => {
                            self.record_conflict(id, report);
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    };
                }
                Err(err) => self.record_escalation_failure(&instance, err, report),
            }
        }

        let Some(transition) = transition else {
            return Ok(());
        };
        match self.store.update(instance, expected).await {
            Ok(saved) => {
                self.emit_sla(&saved, transition, now);
                Ok(())
            }
            Err(StoreError::VersionConflict { .. }) => {
                self.record_conflict(id, report);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn escalates_on_timeout(instance: &ApprovalInstance) -> bool {
        let policy = &instance.policy;
        policy.timeout_behavior == TimeoutBehavior::Escalate
            && policy.allow_escalation
            && policy.escalation_permitted_at(instance.level)
    }

    fn record_escalation_failure(
        &self,
        instance: &ApprovalInstance,
        error: ApprovalError,
        report: &mut SweepReport,
    ) {
        let is_configuration = matches!(
            error,
            ApprovalError::ConfigurationError(_)
                | ApprovalError::OperationNotAllowed { .. }
                | ApprovalError::NoEligibleApprover { .. }
        );
        if is_configuration {
            tracing::error!(
                instance_id = %instance.id,
                tenant = %instance.tenant_id,
                template = %instance.policy.template_code,
                level = %instance.level,
                error = %error,
                "Breached approval cannot be escalated, template needs attention"
            );
            report.configuration_errors.push(ConfigurationIssue {
                instance_id: instance.id.clone(),
                tenant_id: instance.tenant_id.clone(),
                error,
            });
        } else {
            tracing::warn!(instance_id = %instance.id, error = %error, "SLA escalation failed");
        }
    }

    fn record_conflict(&self, id: &InstanceId, report: &mut SweepReport) {
        tracing::warn!(instance_id = %id, "Concurrent update won, SLA change dropped");
        report.conflicts += 1;
    }

    fn emit_sla(&self, instance: &ApprovalInstance, transition: SlaTransition, now: DateTime<Utc>) {
        self.events.emit(
            &instance.tenant_id,
            None,
            ApprovalEvent::SlaStatusChanged {
                instance_id: instance.id.clone(),
                from: transition.from,
                to: transition.to,
            },
            now,
        );
        if transition.is_new_breach() {
            self.events.emit(
                &instance.tenant_id,
                None,
                ApprovalEvent::SlaBreached {
                    instance_id: instance.id.clone(),
                    level: instance.level,
                    due_date: instance.due_date,
                },
                now,
            );
        }
    }

    fn emit_escalation(
        &self,
        original: &ApprovalInstance,
        successor: &ApprovalInstance,
        now: DateTime<Utc>,
    ) {
        self.events.emit(
            &original.tenant_id,
            Some(&self.system.id),
            ApprovalEvent::ApprovalEscalated {
                original_id: original.id.clone(),
                successor_id: successor.id.clone(),
                from_level: original.level,
                to_level: successor.level,
                reason: SLA_EXCEEDED.to_string(),
            },
            now,
        );
        self.events.emit(
            &successor.tenant_id,
            Some(&self.system.id),
            ApprovalEvent::ApprovalRequested {
                instance_id: successor.id.clone(),
                validation_id: successor.validation.id.clone(),
                template_id: successor.template_id().clone(),
                level: successor.level,
                due_date: successor.due_date,
            },
            now,
        );
    }
}
