// src/core/service_client.rs
//! Resilient HTTP client for the platform API: bounded retry, reachability signal,
//! bearer propagation and error-envelope normalization

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::config_manager::ConfigManager;
use super::connectivity::{ConnectionStatus, ConnectivitySignal};
use super::error::{ApiResult, ClientError};
use super::observable::{Observable, Subscription};
use super::transport::{
    HttpTransport, OutgoingRequest, RawResponse, RequestBody, Transport, TransportError,
    UploadFile,
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn normalized_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait after the given failed attempt (1-based): base × attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: String,
    retry: RetryPolicy,
    signal: ConnectivitySignal,
    session_expiries: Observable<u64>,
}

/// Cheap to clone; clones share the transport, signal and retry policy.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

impl ServiceClient {
    /// Create a client over reqwest using the loaded configuration
    pub fn from_config(config: &ConfigManager, signal: ConnectivitySignal) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(
            config.service.api_url.clone(),
            Arc::new(transport),
            config.retry_policy(),
            signal,
        ))
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        signal: ConnectivitySignal,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                retry,
                signal,
                session_expiries: Observable::new(0),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn signal(&self) -> &ConnectivitySignal {
        &self.inner.signal
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.signal.status()
    }

    pub fn subscribe_connection_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.signal.subscribe(callback)
    }

    /// Counter bumped on every 401; upstream session handling listens to it.
    pub fn session_expiries(&self) -> &Observable<u64> {
        &self.inner.session_expiries
    }

    /// One logical call: retries transport failures, never retries a server answer.
    #[instrument(level = "debug", skip(self, method, body, token), fields(method = %method))]
    pub async fn request<R>(
        &self,
        path: &str,
        method: Method,
        body: Option<Value>,
        token: Option<&str>,
    ) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self.build(path, method, json_body(body), token);
        let raw = self.execute(request, None, true).await?;
        decode_body(&raw.body)
    }

    /// Like `request`, but the caller can stop waiting. An attempt already on the wire
    /// still finishes in the background and still updates the connectivity signal.
    pub async fn request_cancellable<R>(
        &self,
        path: &str,
        method: Method,
        body: Option<Value>,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self.build(path, method, json_body(body), token);
        let raw = self.execute(request, Some(cancel), true).await?;
        decode_body(&raw.body)
    }

    /// Single-file multipart upload under the same resilience rules
    #[instrument(level = "debug", skip(self, file, token), fields(file = %file.file_name))]
    pub async fn request_multipart<R>(
        &self,
        path: &str,
        file: UploadFile,
        token: Option<&str>,
    ) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self.build(path, Method::POST, RequestBody::File(file), token);
        let raw = self.execute(request, None, true).await?;
        decode_body(&raw.body)
    }

    pub async fn get<R>(&self, path: &str, token: Option<&str>) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        self.request(path, Method::GET, None, token).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B, token: Option<&str>) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(path, Method::POST, Some(to_json(body)?), token)
            .await
    }

    pub async fn patch<B, R>(&self, path: &str, body: &B, token: Option<&str>) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(path, Method::PATCH, Some(to_json(body)?), token)
            .await
    }

    /// GET whose 401 is returned to the caller only. Used for auxiliary reads that
    /// must not end the session, such as the role lookup.
    pub async fn get_without_expiry<R>(&self, path: &str, token: Option<&str>) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let request = self.build(path, Method::GET, RequestBody::Empty, token);
        let raw = self.execute(request, None, false).await?;
        decode_body(&raw.body)
    }

    fn build(
        &self,
        path: &str,
        method: Method,
        body: RequestBody,
        token: Option<&str>,
    ) -> OutgoingRequest {
        let url = if path.starts_with('/') {
            format!("{}{}", self.inner.base_url, path)
        } else {
            format!("{}/{}", self.inner.base_url, path)
        };

        OutgoingRequest {
            method,
            url,
            bearer: token.map(str::to_string),
            body,
        }
    }

    async fn execute(
        &self,
        request: OutgoingRequest,
        cancel: Option<&CancellationToken>,
        report_expiry: bool,
    ) -> ApiResult<RawResponse> {
        let attempts = self.inner.retry.normalized_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(
                "{} {} (attempt {}/{})",
                request.method, request.url, attempt, attempts
            );

            let handle = self.spawn_attempt(request.clone());
            let outcome = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ClientError::Cancelled),
                    joined = handle => joined,
                },
                None => handle.await,
            };

            match outcome {
                Ok(Ok(raw)) => return self.interpret(raw, &request, report_expiry),
                Ok(Err(TransportError::InvalidRequest(message))) => {
                    warn!("Request to {} could not be built: {}", request.url, message);
                    return Err(ClientError::ValidationRejected(message));
                }
                Ok(Err(e)) => {
                    warn!(
                        "Transport failure for {} (attempt {}/{}): {}",
                        request.url, attempt, attempts, e
                    );
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!("Request task for {} did not complete: {}", request.url, e);
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                let delay = self.inner.retry.delay_after(attempt);
                match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(ClientError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    },
                    None => tokio::time::sleep(delay).await,
                }
            }
        }

        self.inner.signal.mark_unreachable();
        Err(ClientError::NetworkUnavailable {
            attempts,
            last_error,
        })
    }

    /// Each attempt runs in its own task so a caller that stops waiting
    /// does not stop the signal from learning the outcome.
    fn spawn_attempt(
        &self,
        request: OutgoingRequest,
    ) -> JoinHandle<Result<RawResponse, TransportError>> {
        let transport = Arc::clone(&self.inner.transport);
        let signal = self.inner.signal.clone();
        tokio::spawn(async move {
            let result = transport.send(request).await;
            if result.is_ok() {
                signal.mark_reachable();
            }
            result
        })
    }

    fn interpret(
        &self,
        raw: RawResponse,
        request: &OutgoingRequest,
        report_expiry: bool,
    ) -> ApiResult<RawResponse> {
        match raw.status {
            200..=299 => Ok(raw),
            401 => {
                if report_expiry {
                    warn!("Session expired calling {}", request.url);
                    self.inner.session_expiries.update(|count| *count += 1);
                } else {
                    debug!("{} answered 401", request.url);
                }
                Err(ClientError::SessionExpired)
            }
            status => {
                let message = extract_error_message(status, &raw.body);
                debug!("{} {} failed with {}: {}", request.method, request.url, status, message);
                Err(ClientError::RequestFailed { status, message })
            }
        }
    }
}

fn json_body(body: Option<Value>) -> RequestBody {
    body.map(RequestBody::Json).unwrap_or(RequestBody::Empty)
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::validation(format!("request body not serializable: {}", e)))
}

/// Empty bodies decode as JSON null so `()` and `Option<T>` targets work.
pub fn decode_body<R: DeserializeOwned>(body: &[u8]) -> ApiResult<R> {
    let result = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(body)
    };
    result.map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

/// Best human-readable message from an error body: `error.message`, then `detail`,
/// then the status phrase.
pub fn extract_error_message(status: u16, body: &[u8]) -> String {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(message_text)
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|v| v.get("detail"))
                .and_then(message_text)
        })
        .unwrap_or_else(|| status_phrase(status))
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => Some(
                        map.get("msg")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| item.to_string()),
                    ),
                    other => Some(other.to_string()),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        _ => None,
    }
}

fn status_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}
