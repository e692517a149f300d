//! Template registry: stores, versions and activates workflow templates
//!
//! Templates are versioned by `(tenant, code)`. Registering a template whose
//! code already exists creates the next version; activating a version
//! demotes whichever version of the same code was Active before. Routing
//! rules are compiled on the way in.

use crate::CompiledTemplate;
use approval_types::{
    ApprovalError, ApprovalResult, TemplateId, TemplateStats, TemplateStatus, TenantId,
    WorkflowTemplate,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of workflow templates
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<TemplateId, Arc<CompiledTemplate>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template.
    ///
    /// The version is assigned here: one above the highest version already
    /// registered for the same tenant and code. A template submitted as
    /// Active is activated under the same lock; if it fails validation,
    /// nothing is registered.
    pub async fn register(&self, mut template: WorkflowTemplate) -> ApprovalResult<TemplateId> {
        let wants_active = template.status == TemplateStatus::Active;
        if wants_active {
            template.status = TemplateStatus::Draft;
        }

        let mut templates = self.templates.write().await;
        if templates.contains_key(&template.id) {
            return Err(ApprovalError::ConfigurationError(format!(
                "template id {} is already registered",
                template.id
            )));
        }
        template.version = templates
            .values()
            .filter(|c| c.template.tenant_id == template.tenant_id && c.template.code == template.code)
            .map(|c| c.template.version)
            .max()
            .map_or(1, |v| v + 1);

        let compiled = CompiledTemplate::compile(template)?;
        let id = compiled.template.id.clone();
        templates.insert(id.clone(), Arc::new(compiled));

        if wants_active {
            if let Err(e) = Self::activate_in(&mut templates, &id) {
                templates.remove(&id);
                tracing::warn!(template_id = %id, error = %e, "Template rejected on activation, not registered");
                return Err(e);
            }
        }

        if let Some(registered) = templates.get(&id) {
            tracing::info!(
                template_id = %id,
                tenant = %registered.template.tenant_id,
                code = %registered.template.code,
                version = registered.template.version,
                status = ?registered.template.status,
                "Workflow template registered"
            );
        }
        Ok(id)
    }

    /// Validate and activate a version, demoting other Active versions of
    /// the same code
    pub async fn activate(&self, id: &TemplateId) -> ApprovalResult<()> {
        let mut templates = self.templates.write().await;
        Self::activate_in(&mut templates, id)
    }

    fn activate_in(
        templates: &mut HashMap<TemplateId, Arc<CompiledTemplate>>,
        id: &TemplateId,
    ) -> ApprovalResult<()> {
        let entry = templates
            .get_mut(id)
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.clone()))?;
        Arc::make_mut(entry).template.activate()?;

        let (tenant, code) = (entry.template.tenant_id.clone(), entry.template.code.clone());
        for (other_id, other) in templates.iter_mut() {
            if other_id != id
                && other.template.is_active()
                && other.template.tenant_id == tenant
                && other.template.code == code
            {
                Arc::make_mut(other).template.deactivate();
                tracing::info!(template_id = %other_id, code = %code, "Superseded template deactivated");
            }
        }

        tracing::info!(template_id = %id, code = %code, "Workflow template activated");
        Ok(())
    }

    pub async fn deactivate(&self, id: &TemplateId) -> ApprovalResult<()> {
        self.modify(id, |t| t.deactivate()).await
    }

    pub async fn archive(&self, id: &TemplateId) -> ApprovalResult<()> {
        self.modify(id, |t| t.archive()).await
    }

    pub async fn get(&self, id: &TemplateId) -> ApprovalResult<WorkflowTemplate> {
        let templates = self.templates.read().await;
        templates
            .get(id)
            .map(|c| c.template.clone())
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.clone()))
    }

    pub async fn get_compiled(&self, id: &TemplateId) -> ApprovalResult<Arc<CompiledTemplate>> {
        let templates = self.templates.read().await;
        templates
            .get(id)
            .cloned()
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.clone()))
    }

    /// Active templates of one tenant, ready for selection
    pub async fn active_for_tenant(&self, tenant: &TenantId) -> Vec<Arc<CompiledTemplate>> {
        let templates = self.templates.read().await;
        templates
            .values()
            .filter(|c| c.template.is_active() && &c.template.tenant_id == tenant)
            .cloned()
            .collect()
    }

    /// All versions of a template code, oldest first
    pub async fn versions(&self, tenant: &TenantId, code: &str) -> Vec<WorkflowTemplate> {
        let templates = self.templates.read().await;
        let mut versions: Vec<WorkflowTemplate> = templates
            .values()
            .filter(|c| &c.template.tenant_id == tenant && c.template.code == code)
            .map(|c| c.template.clone())
            .collect();
        versions.sort_by_key(|t| t.version);
        versions
    }

    /// Fold one finished execution into a template's statistics
    pub async fn record_execution(
        &self,
        id: &TemplateId,
        success: bool,
        completion_hours: f64,
    ) -> ApprovalResult<TemplateStats> {
        let mut templates = self.templates.write().await;
        let entry = templates
            .get_mut(id)
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.clone()))?;
        let stats = &mut Arc::make_mut(entry).template.stats;
        stats.record_execution(success, completion_hours);
        Ok(stats.clone())
    }

    pub async fn count(&self) -> usize {
        self.templates.read().await.len()
    }

    async fn modify(
        &self,
        id: &TemplateId,
        f: impl FnOnce(&mut WorkflowTemplate),
    ) -> ApprovalResult<()> {
        let mut templates = self.templates.write().await;
        let entry = templates
            .get_mut(id)
            .ok_or_else(|| ApprovalError::TemplateNotFound(id.clone()))?;
        f(&mut Arc::make_mut(entry).template);
        tracing::info!(template_id = %id, status = ?entry.template.status, "Workflow template status changed");
        Ok(())
    }
}
