//! Approval workflow runtime
//!
//! Routes validation results to the workflow template that governs them,
//! drives each approval through its lifecycle, escalates stalled or
//! rejected approvals to the next level, and keeps template statistics.
//!
//! # Architecture
//!
//! The [`ApprovalEngine`] composes specialized components:
//!
//! - [`TemplateRegistry`]: stores, versions and activates templates
//! - [`WorkflowSelector`]: picks the template for a validation snapshot
//! - [`RuleEvaluator`]: evaluates routing conditions
//! - [`ApprovalMatrixResolver`]: works out who may approve at a level
//! - [`EscalationManager`]: creates successor instances at higher levels
//! - [`SlaMonitor`]: periodic sweep that classifies SLAs and escalates breaches
//! - [`StatsAggregator`]: folds finished approvals into template statistics
//!
//! Instances live behind the [`InstanceStore`] trait. Every write is a
//! compare-and-set on the instance version, so the SLA sweep and people
//! acting on the same approval can never both win.
//!
//! # Example
//!
//! ```rust
//! use approval_engine::{ApprovalEngine, EngineConfig, InMemoryInstanceStore, OpenDirectory, SystemClock};
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> ApprovalResult<()> {
//! let engine = ApprovalEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryInstanceStore::new()),
//!     Arc::new(OpenDirectory),
//!     Arc::new(SystemClock),
//! );
//!
//! let mut template = WorkflowTemplate::new(TenantId::new("acme"), "errors", "Error review");
//! template.add_step(WorkflowStep::new(1, Level(1)))?;
//! template.add_matrix_entry(MatrixEntry::new(Level(1), RoleId::new("supervisor")))?;
//! template.add_rule(RoutingRule::new(ConditionType::ErrorCount, ConditionOperator::GreaterThan, "0"));
//! let template_id = engine.register_template(template).await?;
//! engine.registry().activate(&template_id).await?;
//!
//! let request = ApprovalRequest::new(
//!     ValidationSnapshot::new("v-1", TenantId::new("acme")).with_errors(3),
//!     Actor::new("alex", "Alex"),
//!     "three rows failed",
//! );
//! let instance = engine.start_approval(request).await?;
//! assert_eq!(instance.status, ApprovalStatus::Pending);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod escalation_manager;
pub mod events;
pub mod matrix_resolver;
pub mod registry;
pub mod rule_evaluator;
pub mod sla_monitor;
pub mod stats_aggregator;
pub mod store;
pub mod workflow_selector;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ApprovalEngine, Escalation, RejectOutcome};
pub use escalation_manager::{EscalationManager, EscalationPlan};
pub use events::EventPublisher;
pub use matrix_resolver::{ApprovalMatrixResolver, ApproverDirectory, OpenDirectory, StaticDirectory};
pub use registry::TemplateRegistry;
pub use rule_evaluator::RuleEvaluator;
pub use sla_monitor::{ConfigurationIssue, SlaMonitor, SweepReport, SLA_EXCEEDED};
pub use stats_aggregator::StatsAggregator;
pub use store::{InMemoryInstanceStore, InstanceStore, StoreError, StoreResult};
pub use workflow_selector::{CompiledTemplate, WorkflowSelector};
