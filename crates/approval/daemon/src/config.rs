//! Configuration for approvald

use approval_engine::{ApproverDirectory, EngineConfig, OpenDirectory, StaticDirectory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// SLA monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Template source
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Approver directory
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SLA monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl MonitorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Where workflow templates come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// JSON file holding an array of templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One role assignment in the static directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleHolderConfig {
    pub tenant: String,
    pub role: String,
    pub user: String,
}

/// A user who cannot take work right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableConfig {
    pub tenant: String,
    pub user: String,
}

/// Approver directory configuration.
///
/// With no holders listed every role counts as staffed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub holders: Vec<RoleHolderConfig>,

    #[serde(default)]
    pub unavailable: Vec<UnavailableConfig>,
}

impl DirectoryConfig {
    pub fn build(&self) -> Arc<dyn ApproverDirectory> {
        if self.holders.is_empty() {
            return Arc::new(OpenDirectory);
        }
        let mut directory = self
            .holders
            .iter()
            .fold(StaticDirectory::new(), |dir, h| {
                dir.with_holder(&h.tenant, &h.role, &h.user)
            });
        for u in &self.unavailable {
            directory.set_unavailable(&u.tenant, &u.user);
        }
        Arc::new(directory)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_sweep_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the file, then `APPROVAL__*`
    /// environment variables (`APPROVAL__MONITOR__SWEEP_INTERVAL_SECS=60`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APPROVAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{RoleId, TenantId, UserId};

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.monitor.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.templates.path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.monitor.sweep_interval_secs, 300);
        assert_eq!(config.engine.max_escalation_chain, 5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "engine": { "at_risk_window_hours": 2 },
            "monitor": { "sweep_interval_secs": 0 },
            "directory": {
                "holders": [{ "tenant": "acme", "role": "supervisor", "user": "sam" }]
            }
        }"#;
        let config: DaemonConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.at_risk_window_hours, 2);
        assert_eq!(config.engine.max_escalation_chain, 5);
        // A zero interval would spin
        assert_eq!(config.monitor.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.directory.holders.len(), 1);
    }

    #[test]
    fn test_directory_build() {
        let open = DirectoryConfig::default().build();
        assert!(open.has_available_holder(&TenantId::new("acme"), &RoleId::new("anyone")));

        let config = DirectoryConfig {
            holders: vec![RoleHolderConfig {
                tenant: "acme".into(),
                role: "supervisor".into(),
                user: "sam".into(),
            }],
            unavailable: vec![UnavailableConfig {
                tenant: "acme".into(),
                user: "sam".into(),
            }],
        };
        let directory = config.build();
        assert!(!directory.is_available(&TenantId::new("acme"), &UserId::new("sam")));
        assert!(!directory.has_available_holder(&TenantId::new("acme"), &RoleId::new("supervisor")));
    }
}
