use async_trait::async_trait;
use recruiter_sync::core::transport::{
    HttpTransport, OutgoingRequest, RawResponse, Transport, TransportError, UploadFile,
};
use recruiter_sync::{ClientError, ConnectionStatus, ConnectivitySignal, RetryPolicy, ServiceClient};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Transport that replays a fixed script of outcomes and records when it was called.
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    calls: AtomicUsize,
    called_at: Mutex<Vec<Instant>>,
    delay: Duration,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
        Self::slow(script, Duration::ZERO)
    }

    fn slow(script: Vec<Result<RawResponse, TransportError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            called_at: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_at.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::unreachable("script exhausted")))
    }
}

fn refused() -> Result<RawResponse, TransportError> {
    Err(TransportError::unreachable("connection refused"))
}

fn ok(status: u16, body: Value) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    })
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(20),
    }
}

fn scripted_client(transport: Arc<ScriptedTransport>, retry: RetryPolicy) -> ServiceClient {
    ServiceClient::with_transport("http://api.test", transport, retry, ConnectivitySignal::new())
}

fn http_client(base_url: &str, retry: RetryPolicy) -> ServiceClient {
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    ServiceClient::with_transport(base_url, Arc::new(transport), retry, ConnectivitySignal::new())
}

#[tokio::test]
async fn test_transport_failures_exhaust_every_attempt() {
    let transport = ScriptedTransport::new(vec![refused(), refused(), refused()]);
    let client = scripted_client(transport.clone(), fast_retry(3));

    let result = client.get::<Value>("/anything", None).await;

    assert_eq!(
        result,
        Err(ClientError::NetworkUnavailable {
            attempts: 3,
            last_error: "connection refused".into()
        })
    );
    assert_eq!(transport.calls(), 3);
    assert_eq!(client.connection_status(), ConnectionStatus::Unreachable);

    // Linear backoff: base after the first failure, twice the base after the second
    let times = transport.called_at.lock().unwrap().clone();
    assert!(times[1] - times[0] >= Duration::from_millis(20));
    assert!(times[2] - times[1] >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_http_error_status_is_never_retried() {
    let transport = ScriptedTransport::new(vec![ok(500, json!({ "detail": "boom" }))]);
    let client = scripted_client(transport.clone(), fast_retry(3));

    let result = client.get::<Value>("/jobs", None).await;

    assert_eq!(
        result,
        Err(ClientError::RequestFailed {
            status: 500,
            message: "boom".into()
        })
    );
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_recovers_when_a_later_attempt_reaches_the_server() {
    let transport = ScriptedTransport::new(vec![refused(), ok(200, json!({ "id": "42" }))]);
    let client = scripted_client(transport.clone(), fast_retry(3));

    let value: Value = client.get("/jobs/42", None).await.unwrap();

    assert_eq!(value["id"], "42");
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_status_follows_the_latest_completion() {
    let transport = ScriptedTransport::new(vec![refused(), ok(200, json!(null))]);
    let client = scripted_client(transport, fast_retry(1));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = client.subscribe_connection_status(move |status| sink.lock().unwrap().push(*status));

    assert!(client.get::<Value>("/a", None).await.is_err());
    assert!(client.get::<Value>("/b", None).await.is_ok());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ConnectionStatus::Unknown,
            ConnectionStatus::Unreachable,
            ConnectionStatus::Reachable
        ]
    );
}

#[tokio::test]
async fn test_cancelled_caller_still_updates_signal() {
    let transport =
        ScriptedTransport::slow(vec![ok(200, json!({}))], Duration::from_millis(150));
    let client = scripted_client(transport, fast_retry(3));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = client
        .request_cancellable::<Value>("/slow", Method::GET, None, None, &cancel)
        .await;
    assert_eq!(result, Err(ClientError::Cancelled));
    assert_eq!(client.connection_status(), ConnectionStatus::Unknown);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_get_parses_body_and_marks_reachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "42", "title": "Engineer" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(&server.uri(), fast_retry(3));
    let job: Value = client.request("/jobs/42", Method::GET, None, None).await.unwrap();

    assert_eq!(job, json!({ "id": "42", "title": "Engineer" }));
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_unauthorized_is_session_expired_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Bearer expired-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "expired" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(&server.uri(), fast_retry(3));
    let result = client
        .request::<Value>("/protected", Method::GET, None, Some("expired-token"))
        .await;

    assert_eq!(result, Err(ClientError::SessionExpired));
    assert_eq!(client.session_expiries().get(), 1);
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_error_envelope_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": { "message": ["title is required", "salary must be positive"] }
        })))
        .mount(&server)
        .await;

    let client = http_client(&server.uri(), fast_retry(3));
    let result = client.post::<_, Value>("/jobs", &json!({}), Some("t")).await;

    assert_eq!(
        result,
        Err(ClientError::RequestFailed {
            status: 422,
            message: "title is required; salary must be positive".into()
        })
    );
}

#[tokio::test]
async fn test_unreachable_host_exhausts_attempts() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let client = http_client(&format!("http://{}", address), fast_retry(3));
    let result = client.get::<Value>("/anything", None).await;

    assert!(matches!(
        result,
        Err(ClientError::NetworkUnavailable { attempts: 3, .. })
    ));
    assert_eq!(client.connection_status(), ConnectionStatus::Unreachable);
}

#[tokio::test]
async fn test_multipart_upload_sends_file_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/uploads/cv"))
        .and(header("authorization", "Bearer t"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("filename=\"cv.pdf\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "stored": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(&server.uri(), fast_retry(3));
    let upload = UploadFile::new("cv.pdf", b"%PDF-1.4".to_vec());
    let response: Value = client
        .request_multipart("/uploads/cv", upload, Some("t"))
        .await
        .unwrap();

    assert_eq!(response["stored"], true);
    assert_eq!(client.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_independent_signals_do_not_interfere() {
    let failing = scripted_client(ScriptedTransport::new(vec![refused()]), fast_retry(1));
    let healthy = scripted_client(ScriptedTransport::new(vec![ok(200, json!(1))]), fast_retry(1));

    let _ = failing.get::<Value>("/x", None).await;
    let _ = healthy.get::<Value>("/x", None).await;

    assert_eq!(failing.connection_status(), ConnectionStatus::Unreachable);
    assert_eq!(healthy.connection_status(), ConnectionStatus::Reachable);
}

#[tokio::test]
async fn test_unbuildable_request_is_rejected_without_retry() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::InvalidRequest(
        "relative URL without a base".into(),
    ))]);
    let client = scripted_client(transport.clone(), fast_retry(3));

    let result = client.get::<Value>("/jobs", None).await;

    assert_eq!(
        result,
        Err(ClientError::ValidationRejected(
            "relative URL without a base".into()
        ))
    );
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.connection_status(), ConnectionStatus::Unknown);
}

#[tokio::test]
async fn test_malformed_base_url_leaves_signal_untouched() {
    let client = http_client("not a url", fast_retry(3));

    let result = client.get::<Value>("/jobs", None).await;

    assert!(matches!(result, Err(ClientError::ValidationRejected(_))));
    assert_eq!(client.connection_status(), ConnectionStatus::Unknown);
}
