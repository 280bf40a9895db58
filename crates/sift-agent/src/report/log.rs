//! Report records and the payload shipped to the collector.

use crate::filters::ValueMap;
use crate::interception::{BodyContent, CapturedBody};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a reported call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReportType {
    #[default]
    #[serde(rename = "REQUEST_SUCCESS")]
    Success,
    #[serde(rename = "REQUEST_ERROR")]
    Error,
    /// Synthetic notice of reports dropped under load.
    #[serde(rename = "REPORT_LOSS")]
    Loss,
}

/// Furthest interception stage a call reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum Stage {
    #[default]
    #[serde(rename = "UndefinedStage")]
    Undefined,
    #[serde(rename = "ConnectStage")]
    Connect,
    #[serde(rename = "RequestStage")]
    Request,
    #[serde(rename = "ResponseStage")]
    Response,
    #[serde(rename = "BodiesStage")]
    Bodies,
}

/// Summary of one API call. Built once, then handed to the sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportLog {
    #[serde(rename = "Type")]
    pub report_type: ReportType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub stage: Stage,
    /// Identifiers of the rules that selected this call.
    pub active_data_collection_rules: Vec<String>,

    // Connect
    pub hostname: String,
    pub port: u16,
    pub protocol: String,

    // Request
    pub path: String,
    pub method: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub request_headers: ValueMap,

    // Response
    pub response_headers: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    // Bodies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<BodyContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<BodyContent>,
    #[serde(rename = "RequestBodyPayloadSHA", skip_serializing_if = "Option::is_none")]
    pub request_body_payload_sha: Option<String>,
    #[serde(rename = "ResponseBodyPayloadSHA", skip_serializing_if = "Option::is_none")]
    pub response_body_payload_sha: Option<String>,

    // Error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_full_message: Option<String>,
}

impl ReportLog {
    /// Notice for `lost` reports dropped before transmission.
    pub fn loss_notice(lost: u64) -> Self {
        Self {
            report_type: ReportType::Loss,
            stage: Stage::Undefined,
            error_code: Some(lost.to_string()),
            error_full_message: Some(format!("{lost} report logs were lost")),
            ..Default::default()
        }
    }

    pub fn set_request_body(&mut self, body: Option<CapturedBody>) {
        if let Some(body) = body {
            self.request_body = Some(body.content);
            self.request_body_payload_sha = body.sha;
        }
    }

    pub fn set_response_body(&mut self, body: Option<CapturedBody>) {
        if let Some(body) = body {
            self.response_body = Some(body.content);
            self.response_body_payload_sha = body.sha;
        }
    }
}

/// Static description of the reporting agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentInfo {
    #[serde(rename = "Type")]
    pub agent_type: &'static str,
    pub version: String,
}

/// Host runtime description.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeInfo {
    pub arch: &'static str,
    pub platform: &'static str,
}

impl RuntimeInfo {
    pub fn current() -> Self {
        Self {
            arch: std::env::consts::ARCH,
            platform: std::env::consts::OS,
        }
    }
}

/// Body of one POST to the collector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportBatch<'a> {
    pub secret_key: &'a str,
    pub agent: AgentInfo,
    pub runtime: RuntimeInfo,
    pub environment: &'a str,
    pub logs: Vec<&'a ReportLog>,
}
