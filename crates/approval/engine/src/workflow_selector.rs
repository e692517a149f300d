//! Workflow selector: picks the template that governs a validation
//!
//! Templates are compiled once when they are registered. Selection only
//! walks the compiled condition trees, so routing configuration is never
//! re-parsed per validation.

use crate::RuleEvaluator;
use approval_types::{ApprovalResult, ConditionTree, ValidationSnapshot, WorkflowTemplate};
use std::sync::Arc;

/// A template together with its compiled routing tree
#[derive(Clone, Debug)]
pub struct CompiledTemplate {
    pub template: WorkflowTemplate,
    pub routing: ConditionTree,
}

impl CompiledTemplate {
    pub fn compile(template: WorkflowTemplate) -> ApprovalResult<Self> {
        let routing = template.routing()?;
        Ok(Self { template, routing })
    }

    /// Whether this template may be selected for `snapshot` at all
    pub fn is_candidate_for(&self, snapshot: &ValidationSnapshot) -> bool {
        self.template.is_active()
            && self.template.tenant_id == snapshot.tenant_id
            && !self.template.rules.is_empty()
    }
}

/// Selects the applicable workflow for a validation snapshot
#[derive(Clone, Debug, Default)]
pub struct WorkflowSelector {
    evaluator: RuleEvaluator,
}

impl WorkflowSelector {
    pub fn new() -> Self {
        Self {
            evaluator: RuleEvaluator::new(),
        }
    }

    /// Pick the matching template, if any.
    ///
    /// Only Active templates of the snapshot's tenant take part, and a
    /// template without routing rules never matches. When several match,
    /// the one whose matching rules carry the lowest priority number wins,
    /// then the lowest template code. `None` leaves the fallback policy to
    /// the caller.
    pub fn select<'a>(
        &self,
        snapshot: &ValidationSnapshot,
        candidates: &'a [Arc<CompiledTemplate>],
    ) -> Option<&'a CompiledTemplate> {
        let selected = candidates
            .iter()
            .map(Arc::as_ref)
            .filter(|c| c.is_candidate_for(snapshot))
            .filter_map(|c| {
                self.evaluator
                    .matched_priority(&c.routing, snapshot)
                    .map(|priority| (priority, c))
            })
            .min_by(|(pa, a), (pb, b)| {
                pa.cmp(pb)
                    .then_with(|| a.template.code.cmp(&b.template.code))
            })
            .map(|(_, c)| c);

        match selected {
            Some(c) => tracing::debug!(
                validation_id = %snapshot.id,
                template = %c.template.code,
                version = c.template.version,
                "Workflow selected"
            ),
            None => tracing::debug!(validation_id = %snapshot.id, "No workflow matched"),
        }
        selected
    }
}
