//! Configuration types for the sift agent.

mod logging;
mod report;

use std::path::Path;

use crate::interception::{CollectionRule, RuleDescription};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub use logging::LoggingConfig;
pub use report::{BodiesConfig, ReportConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub bodies: BodiesConfig,
    /// Data collection rules. A call is reported when at least one rule
    /// selects it; with no rules every call is reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleDescription>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: AgentConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let endpoint = Url::parse(&self.report.endpoint).map_err(|e| {
            anyhow::anyhow!("Invalid report endpoint '{}': {}", self.report.endpoint, e)
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!(
                "Unsupported report endpoint scheme: '{}'. Currently supported: http, https",
                endpoint.scheme()
            );
        }

        if self.report.in_flight_limit == 0 {
            anyhow::bail!("report.in_flight_limit must be greater than 0");
        }
        if self.report.fan_in_backlog == 0 || self.report.ack_backlog == 0 {
            anyhow::bail!("report.fan_in_backlog and report.ack_backlog must be greater than 0");
        }
        if self.bodies.max_body_size == 0 {
            anyhow::bail!("bodies.max_body_size must be greater than 0");
        }

        let mut ids = std::collections::HashSet::new();
        for rule in &self.rules {
            if !ids.insert(rule.id.as_str()) {
                anyhow::bail!("Duplicate rule id: '{}'", rule.id);
            }
        }

        Ok(())
    }

    /// Compile the configured rules. Rejected filters are logged and skipped.
    pub fn collection_rules(&self) -> Vec<CollectionRule> {
        self.rules
            .iter()
            .map(CollectionRule::from_description)
            .collect()
    }
}
