//! Execution statistics kept on a workflow template

use serde::{Deserialize, Serialize};

/// Aggregate outcome counters for one template
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub average_completion_time_hours: f64,
}

impl TemplateStats {
    /// Record one finished execution and fold its completion time into the
    /// moving average.
    pub fn record_execution(&mut self, success: bool, completion_hours: f64) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        }
        let n = self.execution_count as f64;
        self.average_completion_time_hours =
            (self.average_completion_time_hours * (n - 1.0) + completion_hours) / n;
    }

    /// Percentage of executions that succeeded, 0 when nothing ran yet
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.execution_count as f64 * 100.0
    }
}
