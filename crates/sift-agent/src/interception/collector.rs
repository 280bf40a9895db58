//! Turns a finished, intercepted call into a report.
//!
//! The collector decides whether any collection rule selects the call, reads
//! the bodies from their peek buffers, fills a [`ReportLog`] and hands it to
//! the [`Sender`].

use super::body::{BodyParser, BodySide, CapturedBody};
use super::peek::PeekingReader;
use crate::filters::{canonical_header_name, Filter, FilterDescription, ValueMap};
use crate::report::{ReportLog, ReportType, Sender, Stage};
use chrono::{DateTime, Utc};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Request, Response};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named set of filters. A call is selected when all of them match.
#[derive(Debug, Clone)]
pub struct CollectionRule {
    id: String,
    filters: Vec<Filter>,
}

/// Rule as written in the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuleDescription {
    pub id: String,
    #[serde(default)]
    pub filters: Vec<FilterDescription>,
}

impl CollectionRule {
    pub fn new(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
        }
    }

    /// Build a rule, skipping filters whose description was rejected.
    pub fn from_description(description: &RuleDescription) -> Self {
        let filters = description
            .filters
            .iter()
            .filter_map(|d| match Filter::from_description(d) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    warn!(rule = %description.id, error = %e, "skipping filter");
                    None
                }
            })
            .collect();
        Self::new(description.id.clone(), filters)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn matches<B1, B2>(
        &self,
        request: &Request<B1>,
        response: Option<&Response<B2>>,
    ) -> bool {
        crate::filters::matches_all(&self.filters, request, response)
    }
}

/// Why a call did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// Furthest stage the call reached before failing.
    pub stage: Stage,
    pub code: String,
    pub message: String,
}

/// Everything known about an intercepted call once it is over.
///
/// Bodies are the peek-wrapped streams the proxied consumer read through.
pub struct CompletedCall<R1, R2> {
    pub request: Request<PeekingReader<R1>>,
    pub response: Option<Response<PeekingReader<R2>>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub failure: Option<CallFailure>,
}

pub struct Collector {
    rules: Vec<CollectionRule>,
    parser: BodyParser,
    sender: Arc<Sender>,
}

impl Collector {
    pub fn new(rules: Vec<CollectionRule>, parser: BodyParser, sender: Arc<Sender>) -> Self {
        Self {
            rules,
            parser,
            sender,
        }
    }

    pub fn parser(&self) -> &BodyParser {
        &self.parser
    }

    /// Identifiers of the rules selecting this call, or `None` when it is
    /// not to be reported. Without rules every call is reported.
    pub fn select<B1, B2>(
        &self,
        request: &Request<B1>,
        response: Option<&Response<B2>>,
    ) -> Option<Vec<String>> {
        if self.rules.is_empty() {
            return Some(Vec::new());
        }
        let active: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(request, response))
            .map(|rule| rule.id.clone())
            .collect();
        (!active.is_empty()).then_some(active)
    }

    /// Report the call if a rule selects it. Returns whether it was reported.
    pub fn collect<R1: Read, R2: Read>(&self, call: &mut CompletedCall<R1, R2>) -> bool {
        let Some(active) = self.select(&call.request, call.response.as_ref()) else {
            debug!(uri = %call.request.uri(), "call not selected by any rule");
            return false;
        };
        let log = self.build_report(call, active);
        self.sender.send(log);
        true
    }

    /// Build the report for a call without sending it.
    pub fn build_report<R1: Read, R2: Read>(
        &self,
        call: &mut CompletedCall<R1, R2>,
        active: Vec<String>,
    ) -> ReportLog {
        let endpoint = Endpoint::of(&call.request);
        let mut log = ReportLog {
            report_type: ReportType::Success,
            started_at: call.started_at,
            ended_at: call.ended_at,
            stage: Stage::Request,
            active_data_collection_rules: active,
            hostname: endpoint.hostname,
            port: endpoint.port,
            url: endpoint.url,
            protocol: endpoint.protocol,
            path: call.request.uri().path().to_string(),
            method: call.request.method().to_string(),
            request_headers: header_values(call.request.headers()),
            ..Default::default()
        };

        let request_body = self.capture(BodySide::Request, &mut call.request);
        log.set_request_body(request_body);

        if let Some(response) = call.response.as_mut() {
            log.stage = Stage::Response;
            log.status_code = Some(response.status().as_u16());
            log.response_headers = header_values(response.headers());
            let response_body = self.capture(BodySide::Response, response);
            log.set_response_body(response_body);
            log.stage = Stage::Bodies;
        }

        if let Some(failure) = &call.failure {
            log.report_type = ReportType::Error;
            log.stage = failure.stage;
            log.error_code = Some(failure.code.clone());
            log.error_full_message = Some(failure.message.clone());
        }
        log
    }

    fn capture<M, R>(&self, side: BodySide, message: &mut M) -> Option<CapturedBody>
    where
        M: HasBody<R>,
        R: Read,
    {
        let content_type = message
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let declared = message
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());
        let reader = message.body_reader();
        let length = match declared {
            Some(length) => length,
            None => match reader.peek() {
                Ok(bytes) => bytes.len(),
                Err(e) => {
                    warn!(side = side.as_str(), error = %e, "peeking body failed");
                    return None;
                }
            },
        };
        self.parser
            .capture(side, reader, length, content_type.as_deref())
    }
}

/// Uniform access to the headers and peek-wrapped body of a request or
/// response.
trait HasBody<R> {
    fn headers(&self) -> &HeaderMap;
    fn body_reader(&mut self) -> &mut PeekingReader<R>;
}

impl<R> HasBody<R> for Request<PeekingReader<R>> {
    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }

    fn body_reader(&mut self) -> &mut PeekingReader<R> {
        self.body_mut()
    }
}

impl<R> HasBody<R> for Response<PeekingReader<R>> {
    fn headers(&self) -> &HeaderMap {
        Response::headers(self)
    }

    fn body_reader(&mut self) -> &mut PeekingReader<R> {
        self.body_mut()
    }
}

/// Connection identity of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    protocol: String,
    hostname: String,
    port: u16,
    url: String,
}

impl Endpoint {
    fn of<B>(request: &Request<B>) -> Self {
        let uri = request.uri();
        let protocol = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let default_port = if protocol == "https" { 443 } else { 80 };

        let (hostname, port) = match uri.authority() {
            Some(authority) => (
                authority.host().to_string(),
                authority.port_u16().unwrap_or(default_port),
            ),
            None => {
                let host = request
                    .headers()
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                match host.rsplit_once(':') {
                    Some((name, port)) if port.parse::<u16>().is_ok() => {
                        (name.to_string(), port.parse().unwrap_or(default_port))
                    }
                    _ => (host.to_string(), default_port),
                }
            }
        };

        let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = if port == default_port {
            format!("{protocol}://{hostname}{path_and_query}")
        } else {
            format!("{protocol}://{hostname}:{port}{path_and_query}")
        };

        Self {
            protocol,
            hostname,
            port,
            url,
        }
    }
}

/// Headers as a multi-map keyed by canonical name. Values that are not
/// visible ASCII are skipped.
fn header_values(headers: &HeaderMap) -> ValueMap {
    let mut values = ValueMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            values
                .entry(canonical_header_name(name.as_str()))
                .or_default()
                .push(value.to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::filters::{FilterType, KeyValueMatcher, RangeMatcher};
    use crate::interception::{BodyContent, BodyMarker};
    use crate::report::{Phase, ReportTransport, SenderConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::{Cursor, Read};

    struct Inbox(Mutex<Vec<serde_json::Value>>);

    #[async_trait]
    impl ReportTransport for Inbox {
        async fn deliver(&self, payload: Vec<u8>) -> Result<(), TransportError> {
            let batch: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            self.0.lock().push(batch["Logs"][0].clone());
            Ok(())
        }
    }

    fn parser() -> BodyParser {
        BodyParser::new(1024)
    }

    fn call(
        request: Request<&'static [u8]>,
        response: Option<Response<&'static [u8]>>,
    ) -> CompletedCall<Cursor<&'static [u8]>, Cursor<&'static [u8]>> {
        let p = parser();
        CompletedCall {
            request: request.map(|b| p.reader(Cursor::new(b))),
            response: response.map(|r| r.map(|b| p.reader(Cursor::new(b)))),
            started_at: None,
            ended_at: None,
            failure: None,
        }
    }

    fn json_post() -> Request<&'static [u8]> {
        Request::builder()
            .method("POST")
            .uri("https://api.example.com/v1/charges?expand=true")
            .header("content-type", "application/json")
            .header("x-api-key", "k1")
            .body(&br#"{"amount":100}"#[..])
            .unwrap()
    }

    fn form_response(status: u16) -> Response<&'static [u8]> {
        Response::builder()
            .status(status)
            .header("content-type", "application/x-www-form-urlencoded")
            .header("content-length", "11")
            .body(&b"x=1&y=2&y=3"[..])
            .unwrap()
    }

    fn errors_rule() -> CollectionRule {
        let filter = Filter::with_matcher(
            FilterType::StatusCode,
            RangeMatcher::default().lower_bound(400).into(),
        )
        .unwrap();
        CollectionRule::new("errors", vec![filter])
    }

    fn collector(rules: Vec<CollectionRule>) -> (Collector, Arc<Inbox>, Arc<Sender>) {
        let inbox = Arc::new(Inbox(Mutex::new(Vec::new())));
        let sender = Arc::new(Sender::start(SenderConfig::default(), inbox.clone()));
        (Collector::new(rules, parser(), sender.clone()), inbox, sender)
    }

    #[tokio::test]
    async fn test_report_fields() {
        let (collector, _, _) = collector(Vec::new());
        let mut call = call(json_post(), Some(form_response(201)));
        let log = collector.build_report(&mut call, vec!["all".to_string()]);

        assert_eq!(log.report_type, ReportType::Success);
        assert_eq!(log.stage, Stage::Bodies);
        assert_eq!(log.protocol, "https");
        assert_eq!(log.hostname, "api.example.com");
        assert_eq!(log.port, 443);
        assert_eq!(log.path, "/v1/charges");
        assert_eq!(log.method, "POST");
        assert_eq!(log.url, "https://api.example.com/v1/charges?expand=true");
        assert_eq!(log.request_headers["X-Api-Key"], vec!["k1"]);
        assert_eq!(log.request_headers["Content-Type"], vec!["application/json"]);
        assert_eq!(
            log.response_headers["Content-Type"],
            vec!["application/x-www-form-urlencoded"]
        );
        assert!(!log.request_headers.contains_key("x-api-key"));
        assert_eq!(log.status_code, Some(201));
        assert_eq!(log.active_data_collection_rules, vec!["all"]);
        assert_eq!(
            log.request_body,
            Some(BodyContent::Json(json!({"amount": 100})))
        );
        assert_eq!(
            log.request_body_payload_sha.as_deref(),
            Some(crate::interception::sha256_hex(br#"{"amount":100}"#).as_str())
        );
        let Some(BodyContent::Form(form)) = &log.response_body else {
            panic!("expected a form body");
        };
        assert_eq!(form["y"], vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_capture_leaves_stream_intact() {
        let (collector, _, _) = collector(Vec::new());
        let mut call = call(json_post(), None);
        collector.build_report(&mut call, Vec::new());

        let mut forwarded = String::new();
        call.request.body_mut().read_to_string(&mut forwarded).unwrap();
        assert_eq!(forwarded, r#"{"amount":100}"#);
    }

    #[tokio::test]
    async fn test_failure_without_response() {
        let (collector, _, _) = collector(Vec::new());
        let mut call = call(json_post(), None);
        call.failure = Some(CallFailure {
            stage: Stage::Connect,
            code: "ECONNREFUSED".to_string(),
            message: "connection refused".to_string(),
        });
        let log = collector.build_report(&mut call, Vec::new());

        assert_eq!(log.report_type, ReportType::Error);
        assert_eq!(log.stage, Stage::Connect);
        assert_eq!(log.status_code, None);
        assert_eq!(log.error_code.as_deref(), Some("ECONNREFUSED"));
    }

    #[tokio::test]
    async fn test_binary_and_oversized_bodies_are_markers() {
        let (collector, _, _) = collector(Vec::new());
        let request = Request::builder()
            .uri("http://files.local:8080/upload")
            .header("content-type", "image/png")
            .body(&b"\x89PNG"[..])
            .unwrap();
        let response = Response::builder()
            .header("content-type", "application/json")
            .header("content-length", "4096")
            .body(&b"{}"[..])
            .unwrap();
        let mut call = call(request, Some(response));
        let log = collector.build_report(&mut call, Vec::new());

        assert_eq!(log.port, 8080);
        assert_eq!(log.url, "http://files.local:8080/upload");
        assert_eq!(log.request_body, Some(BodyContent::Marker(BodyMarker::Binary)));
        assert_eq!(log.response_body, Some(BodyContent::Marker(BodyMarker::TooLong)));
        assert!(log.response_body_payload_sha.is_none());
    }

    #[tokio::test]
    async fn test_relative_uri_uses_host_header() {
        let (collector, _, _) = collector(Vec::new());
        let request = Request::builder()
            .uri("/health")
            .header("host", "svc.internal:9000")
            .body(&b""[..])
            .unwrap();
        let mut call = call(request, None);
        let log = collector.build_report(&mut call, Vec::new());
        assert_eq!(log.hostname, "svc.internal");
        assert_eq!(log.port, 9000);
        assert_eq!(log.protocol, "http");
        assert!(log.request_body.is_none());
    }

    #[tokio::test]
    async fn test_rules_select_calls() {
        let header_rule = CollectionRule::new(
            "keyed",
            vec![Filter::with_matcher(
                FilterType::RequestHeaders,
                KeyValueMatcher::new(Some("^X-Api-Key$"), None).into(),
            )
            .unwrap()],
        );
        let (collector, inbox, sender) = collector(vec![errors_rule(), header_rule]);

        let mut ok = call(json_post(), Some(form_response(200)));
        assert!(collector.collect(&mut ok));

        let plain = Request::builder().uri("/").body(&b""[..]).unwrap();
        let mut skipped = call(plain, Some(form_response(200)));
        assert!(!collector.collect(&mut skipped));

        sender.shutdown().await;
        assert_eq!(sender.status().phase, Phase::Stopped);
        let logs = inbox.0.lock().clone();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["ActiveDataCollectionRules"], json!(["keyed"]));
    }

    #[test]
    fn test_rule_from_description_skips_rejected_filters() {
        let description: RuleDescription = serde_yaml::from_str(
            r#"
id: slow-errors
filters:
  - type: status_code
    range: { from: 500 }
  - type: request_headers
    key_pattern: "(?i)^authorization$"
"#,
        )
        .unwrap();
        let rule = CollectionRule::from_description(&description);
        assert_eq!(rule.id(), "slow-errors");
        assert_eq!(rule.filters().len(), 2);
    }
}
