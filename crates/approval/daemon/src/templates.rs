//! Template file loading
//!
//! A template file is a JSON array of workflow templates. Each entry is
//! registered as the next version of its code; entries marked `Active` are
//! validated and activated on the way in.

use crate::error::{DaemonError, DaemonResult};
use approval_engine::ApprovalEngine;
use approval_types::{TemplateId, WorkflowTemplate};
use std::path::Path;

/// Parse a template file's contents
pub fn parse_templates(contents: &str) -> DaemonResult<Vec<WorkflowTemplate>> {
    let templates: Vec<WorkflowTemplate> = serde_json::from_str(contents)?;
    Ok(templates)
}

/// Read and parse a template file
pub async fn read_templates(path: impl AsRef<Path>) -> DaemonResult<Vec<WorkflowTemplate>> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        DaemonError::Template(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_templates(&contents)
}

/// Register every template with the engine, in file order
pub async fn register_all(
    engine: &ApprovalEngine,
    templates: Vec<WorkflowTemplate>,
) -> DaemonResult<Vec<TemplateId>> {
    let mut ids = Vec::with_capacity(templates.len());
    for template in templates {
        let code = template.code.clone();
        let id = engine.register_template(template).await.map_err(|e| {
            DaemonError::Template(format!("template '{}' rejected: {}", code, e))
        })?;
        ids.push(id);
    }
    tracing::info!(count = ids.len(), "Workflow templates loaded");
    Ok(ids)
}
