//! Read-only view of a validation outcome
//!
//! The validation pipeline owns validations. The approval layer only ever
//! sees this snapshot and never writes back to it.

use crate::{ConditionType, TenantId, ValidationId};
use serde::{Deserialize, Serialize};

/// Snapshot of a validation outcome as consumed by routing and approval
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationSnapshot {
    pub id: ValidationId,
    pub tenant_id: TenantId,
    pub error_count: u64,
    pub warning_count: u64,
    pub file_type: String,
    /// File size in bytes
    pub file_size: u64,
    pub record_count: u64,
    /// Validation status as reported by the pipeline (e.g. "Failed")
    pub status: String,
    /// Monetary amount at stake, if the pipeline reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl ValidationSnapshot {
    pub fn new(id: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            id: ValidationId::new(id),
            tenant_id,
            error_count: 0,
            warning_count: 0,
            file_type: String::new(),
            file_size: 0,
            record_count: 0,
            status: String::new(),
            amount: None,
        }
    }

    pub fn with_errors(mut self, count: u64) -> Self {
        self.error_count = count;
        self
    }

    pub fn with_warnings(mut self, count: u64) -> Self {
        self.warning_count = count;
        self
    }

    pub fn with_file(mut self, file_type: impl Into<String>, size: u64) -> Self {
        self.file_type = file_type.into();
        self.file_size = size;
        self
    }

    pub fn with_records(mut self, count: u64) -> Self {
        self.record_count = count;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// String form of the field a routing condition inspects.
    ///
    /// Returns `None` for condition types this snapshot cannot answer.
    pub fn field(&self, condition_type: &ConditionType) -> Option<String> {
        match condition_type {
            ConditionType::ErrorCount => Some(self.error_count.to_string()),
            ConditionType::WarningCount => Some(self.warning_count.to_string()),
            ConditionType::FileType => Some(self.file_type.clone()),
            ConditionType::FileSize => Some(self.file_size.to_string()),
            ConditionType::RecordCount => Some(self.record_count.to_string()),
            ConditionType::ValidationStatus => Some(self.status.clone()),
            ConditionType::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let snap = ValidationSnapshot::new("v-1", TenantId::new("acme"))
            .with_errors(10)
            .with_warnings(2)
            .with_file("csv", 2048)
            .with_records(500)
            .with_status("Failed");

        assert_eq!(snap.field(&ConditionType::ErrorCount).as_deref(), Some("10"));
        assert_eq!(snap.field(&ConditionType::WarningCount).as_deref(), Some("2"));
        assert_eq!(snap.field(&ConditionType::FileType).as_deref(), Some("csv"));
        assert_eq!(snap.field(&ConditionType::FileSize).as_deref(), Some("2048"));
        assert_eq!(snap.field(&ConditionType::RecordCount).as_deref(), Some("500"));
        assert_eq!(
            snap.field(&ConditionType::ValidationStatus).as_deref(),
            Some("Failed")
        );
        assert_eq!(snap.field(&ConditionType::Unknown), None);
    }
}
