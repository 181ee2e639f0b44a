// src/core/transport.rs
//! Wire-level seam: one attempt in, one raw response (or transport failure) out

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the multipart field every upload endpoint expects.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("body", &self.body)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    File(UploadFile),
}

#[derive(Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name);
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("File has no usable name: {}", path.display()))?;
        Ok(Self::new(file_name, bytes))
    }
}

/// Content type for the upload kinds the platform accepts (CVs, avatars, intro videos).
pub fn content_type_for(file_name: &str) -> &'static str {
    let lower_name = file_name.to_lowercase();
    let extension = lower_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request never reached a server (DNS, refused connection, timeout).
    #[error("{0}")]
    Unreachable(String),
    /// The request could not be built (malformed URL, bad header). Retrying cannot help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .header("Accept", "application/json");

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::File(file) => {
                let part = match Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(file.content_type)
                {
                    Ok(part) => part,
                    Err(_) => Part::bytes(file.bytes).file_name(file.file_name),
                };
                builder.multipart(Form::new().part(UPLOAD_FIELD, part))
            }
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                return TransportError::InvalidRequest(e.to_string());
            }
            let kind = if e.is_timeout() {
                "timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "transport error"
            };
            TransportError::Unreachable(format!("{}: {}", kind, e))
        })?;

        let status = response.status().as_u16();
        // The server answered; a truncated body still counts as reaching it.
        let body = response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .unwrap_or_default();

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("resume.PDF"), "application/pdf");
        assert_eq!(
            content_type_for("cv.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(content_type_for("intro.webm"), "video/webm");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_debug_redacts_bearer() {
        let request = OutgoingRequest {
            method: Method::GET,
            url: "http://localhost/health".to_string(),
            bearer: Some("secret-token".to_string()),
            body: RequestBody::Empty,
        };
        let printed = format!("{:?}", request);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_upload_from_path_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        tokio::fs::write(&path, b"png-bytes").await.unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "avatar.png");
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.bytes, b"png-bytes");
    }
}
