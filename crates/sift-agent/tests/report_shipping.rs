//! End-to-end report shipping against a local collector.
//!
//! A minimal hyper server stands in for the remote collector and records
//! every batch it receives.

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use sift_agent::filters::{Filter, FilterType, RangeMatcher};
use sift_agent::interception::{BodyParser, CollectionRule, Collector, CompletedCall};
use sift_agent::report::{HttpTransport, Phase, ReportLog, Sender, SenderConfig};
use std::convert::Infallible;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct Received {
    content_type: Option<String>,
    accept: Option<String>,
    batch: Value,
}

struct FakeCollector {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
}

impl FakeCollector {
    /// Start a collector answering every POST with `status`.
    async fn start(status: StatusCode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let store = received.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let store = store.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let store = store.clone();
                        async move {
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_string)
                            };
                            let content_type = header("content-type");
                            let accept = header("accept");
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            let batch = serde_json::from_slice(&body).unwrap_or(Value::Null);
                            store.lock().push(Received {
                                content_type,
                                accept,
                                batch,
                            });
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(b"{}")))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, received }
    }

    fn endpoint(&self) -> String {
        format!("http://{}/logs", self.addr)
    }

    fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }
}

fn sender_for(endpoint: &str, limit: u64) -> Sender {
    let transport = HttpTransport::new(endpoint, Duration::from_secs(2)).unwrap();
    Sender::start(
        SenderConfig {
            in_flight_limit: limit,
            secret_key: "sk_integration".to_string(),
            environment: "test".to_string(),
            ..Default::default()
        },
        Arc::new(transport),
    )
}

fn report(path: &str) -> ReportLog {
    ReportLog {
        path: path.to_string(),
        method: "GET".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_reports_are_posted_as_json() {
    let collector = FakeCollector::start(StatusCode::OK).await;
    let sender = sender_for(&collector.endpoint(), 10);

    sender.send(report("/users"));
    tokio::time::timeout(TEST_TIMEOUT, sender.shutdown())
        .await
        .expect("sender drained");

    let received = collector.received();
    assert_eq!(received.len(), 1);
    let request = &received[0];
    assert_eq!(
        request.content_type.as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(request.accept.as_deref(), Some("application/json"));
    assert_eq!(request.batch["SecretKey"], "sk_integration");
    assert_eq!(request.batch["Environment"], "test");
    assert_eq!(request.batch["Logs"][0]["Path"], "/users");
    assert_eq!(request.batch["Logs"][0]["Type"], "REQUEST_SUCCESS");
}

#[tokio::test]
async fn test_stop_drains_queued_reports() {
    let collector = FakeCollector::start(StatusCode::OK).await;
    let sender = sender_for(&collector.endpoint(), 50);

    for i in 0..20 {
        sender.send(report(&format!("/items/{i}")));
    }
    tokio::time::timeout(TEST_TIMEOUT, sender.shutdown())
        .await
        .expect("sender drained");

    assert_eq!(collector.received().len(), 20);
    let status = sender.status();
    assert_eq!(status.phase, Phase::Stopped);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn test_server_errors_are_not_retried() {
    let collector = FakeCollector::start(StatusCode::INTERNAL_SERVER_ERROR).await;
    let sender = sender_for(&collector.endpoint(), 10);

    sender.send(report("/flaky"));
    tokio::time::timeout(TEST_TIMEOUT, sender.shutdown())
        .await
        .expect("sender drained");

    assert_eq!(collector.received().len(), 1);
    assert_eq!(sender.status().lost, 0);
}

#[tokio::test]
async fn test_unreachable_collector_does_not_block_shutdown() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let sender = sender_for(&format!("http://{addr}/logs"), 10);

    sender.send(report("/nowhere"));
    tokio::time::timeout(TEST_TIMEOUT, sender.shutdown())
        .await
        .expect("sender stopped");
    assert_eq!(sender.status().in_flight, 0);
}

#[tokio::test]
async fn test_send_after_shutdown_is_dropped() {
    let collector = FakeCollector::start(StatusCode::OK).await;
    let sender = sender_for(&collector.endpoint(), 10);
    sender.shutdown().await;

    sender.send(report("/late"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(collector.received().is_empty());
}

#[tokio::test]
async fn test_collector_pipeline() {
    let collector = FakeCollector::start(StatusCode::OK).await;
    let sender = Arc::new(sender_for(&collector.endpoint(), 10));

    let errors = CollectionRule::new(
        "server-errors",
        vec![Filter::with_matcher(
            FilterType::StatusCode,
            RangeMatcher::default().lower_bound(500).into(),
        )
        .unwrap()],
    );
    let parser = BodyParser::new(4096);
    let agent = Collector::new(vec![errors], parser.clone(), sender.clone());

    let call = |status: u16| {
        let request = Request::builder()
            .method("POST")
            .uri("https://payments.example.com/v2/charges")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(parser.reader(Cursor::new(b"amount=100&currency=eur".to_vec())))
            .unwrap();
        let response = Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(parser.reader(Cursor::new(br#"{"error":"upstream"}"#.to_vec())))
            .unwrap();
        CompletedCall {
            request,
            response: Some(response),
            started_at: Some(chrono::Utc::now()),
            ended_at: Some(chrono::Utc::now()),
            failure: None,
        }
    };

    assert!(agent.collect(&mut call(502)));
    assert!(!agent.collect(&mut call(200)));
    tokio::time::timeout(TEST_TIMEOUT, sender.shutdown())
        .await
        .expect("sender drained");

    let received = collector.received();
    assert_eq!(received.len(), 1);
    let log = &received[0].batch["Logs"][0];
    assert_eq!(log["Hostname"], "payments.example.com");
    assert_eq!(log["Port"], 443);
    assert_eq!(log["StatusCode"], 502);
    assert_eq!(log["Stage"], "BodiesStage");
    assert_eq!(log["RequestBody"]["currency"][0], "eur");
    assert_eq!(log["ResponseBody"]["error"], "upstream");
    assert_eq!(log["ActiveDataCollectionRules"][0], "server-errors");
    assert!(log["ResponseBodyPayloadSHA"].as_str().unwrap().len() == 64);
}
