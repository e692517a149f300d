//! End-to-end approval flows through the engine facade.
//!
//! A validation is routed to its template, worked through one or more
//! levels, and the template statistics reflect the outcome.

use approval_engine::*;
use approval_types::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with_holder("acme", "supervisor", "sam")
        .with_holder("acme", "finance", "fin-1")
        .with_holder("acme", "finance", "fin-2")
        .with_holder("acme", "director", "dora")
}

fn setup(directory: StaticDirectory) -> (ApprovalEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = ApprovalEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryInstanceStore::new()),
        Arc::new(directory),
        clock.clone(),
    );
    (engine, clock)
}

/// High-error validations: supervisor first, then two finance sign-offs,
/// then a director
fn high_error_template() -> WorkflowTemplate {
    let mut t = WorkflowTemplate::new(TenantId::new("acme"), "high-errors", "High error count")
        .with_sla_hours(24, 8)
        .with_escalation()
        .requiring_reject_comments();
    t.add_step(WorkflowStep::new(1, Level(1)).with_name("Supervisor review"))
        .unwrap();
    t.add_step(WorkflowStep::new(2, Level(2)).with_name("Finance review"))
        .unwrap();
    t.add_step(WorkflowStep::new(3, Level(3)).with_name("Director sign-off"))
        .unwrap();
    t.add_matrix_entry(MatrixEntry::new(Level(1), RoleId::new("supervisor")).escalatable())
        .unwrap();
    t.add_matrix_entry(
        MatrixEntry::new(Level(2), RoleId::new("finance"))
            .escalatable()
            .with_min_approvers(2),
    )
    .unwrap();
    t.add_matrix_entry(MatrixEntry::new(Level(3), RoleId::new("director")))
        .unwrap();
    t.add_rule(
        RoutingRule::new(ConditionType::ErrorCount, ConditionOperator::GreaterThan, "10")
            .with_priority(1),
    );
    t
}

/// Catch-all for CSV uploads with warnings
fn csv_template() -> WorkflowTemplate {
    let mut t = WorkflowTemplate::new(TenantId::new("acme"), "csv-warnings", "CSV warnings")
        .with_sla_hours(48, 12);
    t.add_step(WorkflowStep::new(1, Level(1))).unwrap();
    t.add_matrix_entry(MatrixEntry::new(Level(1), RoleId::new("supervisor")))
        .unwrap();
    t.add_rule(
        RoutingRule::new(ConditionType::FileType, ConditionOperator::Equals, "csv")
            .with_priority(5),
    );
    t.add_rule(
        RoutingRule::new(ConditionType::WarningCount, ConditionOperator::GreaterThan, "0")
            .with_priority(6),
    );
    t
}

async fn activate(engine: &ApprovalEngine, template: WorkflowTemplate) -> TemplateId {
    let id = engine.register_template(template).await.unwrap();
    engine.registry().activate(&id).await.unwrap();
    id
}

fn request(validation: ValidationSnapshot) -> ApprovalRequest {
    ApprovalRequest::new(validation, Actor::new("alex", "Alex"), "validation needs sign-off")
}

fn sam() -> Actor {
    Actor::new("sam", "Sam").with_role("supervisor")
}

fn finance(n: u32) -> Actor {
    Actor::new(format!("fin-{n}"), format!("Finance {n}")).with_role("finance")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_routing_prefers_lowest_rule_priority() {
    let (engine, _) = setup(directory());
    let high = activate(&engine, high_error_template()).await;
    let csv = activate(&engine, csv_template()).await;

    // Matches both templates; the priority-1 rule wins
    let both = ValidationSnapshot::new("v-1", TenantId::new("acme"))
        .with_errors(40)
        .with_file("csv", 1024);
    let inst = engine.start_approval(request(both)).await.unwrap();
    assert_eq!(inst.template_id(), &high);

    let warnings_only = ValidationSnapshot::new("v-2", TenantId::new("acme"))
        .with_warnings(2)
        .with_file("csv", 1024);
    let inst = engine.start_approval(request(warnings_only)).await.unwrap();
    assert_eq!(inst.template_id(), &csv);
    assert_eq!(inst.due_date, t0() + Duration::hours(48));
}

#[tokio::test]
async fn test_templates_are_tenant_scoped() {
    let (engine, _) = setup(directory());
    activate(&engine, high_error_template()).await;

    let other_tenant = ValidationSnapshot::new("v-9", TenantId::new("globex")).with_errors(40);
    let err = engine.start_approval(request(other_tenant)).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NoMatchingWorkflow(ref v) if v == "v-9"));
}

#[tokio::test]
async fn test_inactive_template_never_selected() {
    let (engine, _) = setup(directory());
    let id = activate(&engine, high_error_template()).await;
    engine.registry().deactivate(&id).await.unwrap();

    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    assert!(engine.start_approval(request(snapshot)).await.is_err());
}

#[tokio::test]
async fn test_new_template_version_only_affects_new_approvals() {
    let (engine, _) = setup(directory());
    activate(&engine, high_error_template()).await;
    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let before = engine.start_approval(request(snapshot.clone())).await.unwrap();

    let v2 = activate(&engine, high_error_template().with_sla_hours(4, 2)).await;
    let after = engine.start_approval(request(snapshot)).await.unwrap();

    assert_eq!(before.policy.template_version, 1);
    assert_eq!(before.due_date, t0() + Duration::hours(24));
    assert_eq!(after.template_id(), &v2);
    assert_eq!(after.policy.template_version, 2);
    assert_eq!(after.due_date, t0() + Duration::hours(4));

    let stored = engine.get(&before.id).await.unwrap();
    assert_eq!(stored.policy.default_sla_hours, 24);
}

#[tokio::test]
async fn test_escalation_through_quorum_level() {
    let (engine, clock) = setup(directory());
    let template_id = activate(&engine, high_error_template()).await;
    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let inst = engine.start_approval(request(snapshot)).await.unwrap();

    clock.advance(Duration::hours(2));
    engine.assign(&inst.id, &sam()).await.unwrap();
    let escalation = engine
        .escalate(&inst.id, &sam(), "outside my remit")
        .await
        .unwrap();
    let successor = escalation.successor;
    assert_eq!(successor.level, Level(2));
    assert_eq!(successor.quorum, 2);
    assert_eq!(successor.requested_at, t0());
    assert_eq!(successor.due_date, t0() + Duration::hours(2) + Duration::hours(8));
    assert!(successor.request_reason.starts_with(ESCALATION_MARKER));

    // Supervisors have no say at the finance level
    engine.assign(&successor.id, &finance(1)).await.unwrap();
    let err = engine.approve(&successor.id, &sam(), None).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotAuthorized(_)));

    clock.advance(Duration::hours(1));
    let first = engine.approve(&successor.id, &finance(1), None).await.unwrap();
    assert_eq!(first.status, ApprovalStatus::InReview);

    let dup = engine
        .approve(&successor.id, &finance(1), None)
        .await
        .unwrap_err();
    assert!(matches!(dup, ApprovalError::ValidationError(_)));

    clock.advance(Duration::hours(1));
    let done = engine
        .approve(&successor.id, &finance(2), Some("numbers reconciled".into()))
        .await
        .unwrap();
    assert_eq!(done.status, ApprovalStatus::Approved);
    assert_eq!(done.votes.len(), 2);

    // One execution for the whole chain, timed from the original request
    let stats = engine.registry().get(&template_id).await.unwrap().stats;
    assert_eq!(stats.execution_count, 1);
    assert_eq!(stats.success_count, 1);
    assert!((stats.average_completion_time_hours - 4.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_escalation_blocked_without_available_approver() {
    let mut dir = directory();
    dir.set_unavailable("acme", "fin-1");
    dir.set_unavailable("acme", "fin-2");
    let (engine, _) = setup(dir);
    activate(&engine, high_error_template()).await;
    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let inst = engine.start_approval(request(snapshot)).await.unwrap();

    let err = engine.escalate(&inst.id, &sam(), "help").await.unwrap_err();
    assert!(matches!(err, ApprovalError::NoEligibleApprover { .. }));

    let stored = engine.get(&inst.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Pending);
    assert_eq!(engine.list(&TenantId::new("acme"), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejection_counts_as_failure() {
    let (engine, _) = setup(directory());
    let template_id = activate(&engine, high_error_template()).await;
    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let inst = engine.start_approval(request(snapshot)).await.unwrap();
    engine.assign(&inst.id, &sam()).await.unwrap();

    let outcome = engine
        .reject(&inst.id, &sam(), "source file is corrupt", None)
        .await
        .unwrap();
    let RejectOutcome::Rejected(rejected) = outcome else {
        panic!("template ends the workflow on rejection");
    };
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("source file is corrupt")
    );

    let stats = engine.registry().get(&template_id).await.unwrap().stats;
    assert_eq!(stats.execution_count, 1);
    assert_eq!(stats.success_count, 0);

    let rejected_list = engine
        .list(&TenantId::new("acme"), Some(ApprovalStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(rejected_list.len(), 1);
}

#[tokio::test]
async fn test_history_is_append_only_across_the_lifecycle() {
    let (engine, clock) = setup(directory());
    activate(&engine, high_error_template()).await;
    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let inst = engine.start_approval(request(snapshot)).await.unwrap();

    let seen = inst.history().to_vec();

    clock.advance(Duration::minutes(5));
    let assigned = engine.assign(&inst.id, &sam()).await.unwrap();
    assert_eq!(&assigned.history()[..seen.len()], seen.as_slice());
    let seen = assigned.history().to_vec();

    clock.advance(Duration::minutes(5));
    let commented = engine
        .add_comment(&inst.id, &sam(), "looking into it", false)
        .await
        .unwrap();
    assert_eq!(&commented.history()[..seen.len()], seen.as_slice());

    clock.advance(Duration::minutes(5));
    let cancelled = engine
        .cancel(&inst.id, &Actor::new("alex", "Alex"), "uploaded again")
        .await
        .unwrap();
    assert_eq!(
        &cancelled.history()[..commented.history().len()],
        commented.history()
    );
    let seen = cancelled.history().to_vec();

    let sequences: Vec<u64> = seen.iter().map(|h| h.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
}

#[tokio::test]
async fn test_event_envelopes_carry_tenant_and_actor() {
    let (engine, _) = setup(directory());
    activate(&engine, high_error_template()).await;
    let mut rx = engine.subscribe();

    let snapshot = ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(40);
    let inst = engine.start_approval(request(snapshot)).await.unwrap();
    engine.assign(&inst.id, &sam()).await.unwrap();

    let requested = rx.recv().await.unwrap();
    assert_eq!(requested.tenant_id, TenantId::new("acme"));
    assert_eq!(requested.actor, Some(UserId::new("alex")));
    assert_eq!(requested.event.instance_id(), &inst.id);

    let assigned = rx.recv().await.unwrap();
    assert_eq!(assigned.actor, Some(UserId::new("sam")));
    assert!(matches!(
        assigned.event,
        ApprovalEvent::ApprovalAssigned { ref assignee, .. } if assignee == &UserId::new("sam")
    ));
}
