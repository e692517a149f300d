//! Engine configuration

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunables shared by the engine facade and the SLA monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Open approvals with this little time left are AtRisk
    #[serde(default = "default_at_risk_window_hours")]
    pub at_risk_window_hours: u32,

    /// Longest predecessor chain an escalation may build
    #[serde(default = "default_max_escalation_chain")]
    pub max_escalation_chain: u32,

    /// Actor id recorded for monitor-initiated transitions
    #[serde(default = "default_system_actor")]
    pub system_actor: String,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_at_risk_window_hours() -> u32 {
    4
}

fn default_max_escalation_chain() -> u32 {
    5
}

fn default_system_actor() -> String {
    "system".to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            at_risk_window_hours: default_at_risk_window_hours(),
            max_escalation_chain: default_max_escalation_chain(),
            system_actor: default_system_actor(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn at_risk_window(&self) -> Duration {
        Duration::hours(i64::from(self.at_risk_window_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.at_risk_window(), Duration::hours(4));
        assert_eq!(config.max_escalation_chain, 5);
        assert_eq!(config.system_actor, "system");
    }
}
