//! Stats aggregator: folds finished approvals into template statistics

use crate::TemplateRegistry;
use approval_types::{ApprovalInstance, ApprovalResult, ApprovalStatus, TemplateStats};
use std::sync::Arc;

/// Records workflow outcomes on the governing template
#[derive(Clone, Debug)]
pub struct StatsAggregator {
    registry: Arc<TemplateRegistry>,
}

impl StatsAggregator {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    /// Record the outcome of a resolved instance.
    ///
    /// Approved counts as a success; Rejected and Cancelled as failures.
    /// Escalated instances are skipped since their successor carries the
    /// outcome. Completion time runs from the original request, so an
    /// escalation chain counts once, end to end.
    pub async fn record_outcome(
        &self,
        instance: &ApprovalInstance,
    ) -> ApprovalResult<Option<TemplateStats>> {
        let success = match instance.status {
            ApprovalStatus::Approved => true,
            ApprovalStatus::Rejected | ApprovalStatus::Cancelled => false,
            _ => return Ok(None),
        };
        let Some(hours) = instance.completion_hours() else {
            return Ok(None);
        };

        let stats = self
            .registry
            .record_execution(instance.template_id(), success, hours)
            .await?;
        tracing::debug!(
            template_id = %instance.template_id(),
            executions = stats.execution_count,
            success_rate = stats.success_rate(),
            "Template statistics updated"
        );
        Ok(Some(stats))
    }
}
