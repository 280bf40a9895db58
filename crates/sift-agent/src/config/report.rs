//! Report shipping and body capture configuration.

use crate::interception::DEFAULT_MAX_BODY_SIZE;
use crate::report::{SenderConfig, ACK_BACKLOG, DEFAULT_IN_FLIGHT_LIMIT, FAN_IN_BACKLOG};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReportConfig {
    /// Collector endpoint receiving report batches
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub secret_key: String,
    /// Runtime environment type (staging, production, ...)
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Reports beyond this many unacknowledged transmissions are dropped
    #[serde(default = "default_in_flight_limit")]
    pub in_flight_limit: u64,
    #[serde(default = "default_fan_in_backlog")]
    pub fan_in_backlog: usize,
    #[serde(default = "default_ack_backlog")]
    pub ack_backlog: usize,
    /// HTTP client timeout for one transmission
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://agent.bearer.sh/logs".to_string()
}

fn default_environment() -> String {
    "default".to_string()
}

fn default_in_flight_limit() -> u64 {
    DEFAULT_IN_FLIGHT_LIMIT
}

fn default_fan_in_backlog() -> usize {
    FAN_IN_BACKLOG
}

fn default_ack_backlog() -> usize {
    ACK_BACKLOG
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            secret_key: String::new(),
            environment: default_environment(),
            in_flight_limit: default_in_flight_limit(),
            fan_in_backlog: default_fan_in_backlog(),
            ack_backlog: default_ack_backlog(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ReportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            in_flight_limit: self.in_flight_limit,
            fan_in_backlog: self.fan_in_backlog,
            ack_backlog: self.ack_backlog,
            secret_key: self.secret_key.clone(),
            environment: self.environment.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BodiesConfig {
    /// Bodies of this size or larger are reported as omitted
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

impl Default for BodiesConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
        }
    }
}
