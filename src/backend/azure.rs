//! Azure Blob REST backend
//!
//! Talks to the blob service of one storage account over HTTPS using
//! `reqwest`, signing every request with the account's Shared Key.
//!
//! # Tracing
//!
//! All operations are instrumented:
//!
//! | Operation | Span Name | Request |
//! |-----------|-----------|---------|
//! | Container exists | `azure.container_exists` | `HEAD /{container}?restype=container` |
//! | Blob exists | `azure.exists` | `HEAD /{container}/{blob}` |
//! | Create append blob | `azure.create_append_blob` | `PUT` with `x-ms-blob-type: AppendBlob`, `If-None-Match: *` |
//! | Append block | `azure.append_block` | `PUT ?comp=appendblock` |
//! | Acquire lease | `azure.acquire_lease` | `PUT ?comp=lease`, action `acquire`, duration `-1` |
//! | Release lease | `azure.release_lease` | `PUT ?comp=lease`, action `release` |
//! | Delete | `azure.delete_if_exists` | `DELETE` (404 tolerated) |
//! | Conditional create | `azure.create_if_absent` | `PUT` with `If-None-Match: *` |
//!
//! # Example
//!
//! ```no_run
//! use kasane_appendr::backend::{AzureBackend, AzureBackendConfig, BlobBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = AzureBackend::new(AzureBackendConfig {
//!     account: "prodlogs".to_string(),
//!     key: "c2VjcmV0".to_string(),
//!     endpoint: None,
//!     timeout_seconds: 30,
//! })?;
//! let present = backend.container_exists("audit").await?;
//! # Ok(())
//! # }
//! ```

use super::signing::SharedKeySigner;
use super::{BackendResult, BlobBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// REST API version sent with every request
pub const AZURE_API_VERSION: &str = "2021-08-06";

/// Largest block accepted by Append Block (4 MiB)
pub const MAX_APPEND_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Characters escaped in blob paths: everything except unreserved and '/'
const BLOB_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Errors building an Azure backend
#[derive(Error, Debug)]
pub enum AzureConfigError {
    #[error("Invalid account key: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// Connection settings for one storage account
#[derive(Debug, Clone)]
pub struct AzureBackendConfig {
    pub account: String,
    /// Base64 Shared Key
    pub key: String,
    /// Service endpoint override, e.g. an emulator URL
    pub endpoint: Option<String>,
    pub timeout_seconds: u64,
}

/// `<Error><Code/><Message/></Error>` body returned on failures
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Blob service client for one account
pub struct AzureBackend {
    account: String,
    base_url: String,
    signer: SharedKeySigner,
    http_client: reqwest::Client,
}

impl AzureBackend {
    /// Create a new backend
    pub fn new(config: AzureBackendConfig) -> Result<Self, AzureConfigError> {
        let signer = SharedKeySigner::new(&config.account, &config.key)?;

        let base_url = match &config.endpoint {
            Some(endpoint) => {
                Url::parse(endpoint)
                    .map_err(|e| AzureConfigError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
                endpoint.trim_end_matches('/').to_string()
            }
            None => format!("https://{}.blob.core.windows.net", config.account),
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AzureConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            account: config.account,
            base_url,
            signer,
            http_client,
        })
    }

    /// Service endpoint
    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn container_url(&self, container: &str, query: &str) -> BackendResult<Url> {
        let raw = format!("{}/{}?{}", self.base_url, container, query);
        Url::parse(&raw).map_err(|e| BackendError::transport(format!("invalid URL {}: {}", raw, e)))
    }

    fn blob_url(&self, container: &str, blob: &str, query: Option<&str>) -> BackendResult<Url> {
        let encoded = utf8_percent_encode(blob, BLOB_PATH_ENCODE_SET);
        let raw = match query {
            Some(q) => format!("{}/{}/{}?{}", self.base_url, container, encoded, q),
            None => format!("{}/{}/{}", self.base_url, container, encoded),
        };
        Url::parse(&raw).map_err(|e| BackendError::transport(format!("invalid URL {}: {}", raw, e)))
    }

    fn rfc1123_date() -> String {
        chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    /// Sign and send a request
    async fn send(
        &self,
        method: Method,
        url: Url,
        extra_headers: Vec<(String, String)>,
        body: Bytes,
    ) -> BackendResult<reqwest::Response> {
        let mut headers = vec![
            ("x-ms-date".to_string(), Self::rfc1123_date()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        headers.extend(extra_headers);

        // Only bodies on PUT carry a length on the wire
        if method == Method::PUT {
            headers.push(("Content-Length".to_string(), body.len().to_string()));
        }

        let authorization = self.signer.authorization(method.as_str(), &url, &headers);

        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", authorization);
        for (name, value) in &headers {
            if !name.eq_ignore_ascii_case("content-length") {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        request
            .body(body)
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("request failed: {}", e)))
    }

    /// Turn a failed response into a backend error.
    ///
    /// The service sends `x-ms-error-code`; bodies are only present on
    /// non-HEAD requests.
    async fn into_error(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let header_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = if body.trim().is_empty() {
            None
        } else {
            quick_xml::de::from_str(body.trim_start_matches('\u{feff}')).ok()
        };

        let (body_code, message) = match parsed {
            Some(parsed) => (parsed.code, parsed.message.unwrap_or_default()),
            None => (None, body),
        };

        BackendError {
            status: Some(status),
            code: header_code.or(body_code),
            message: message.lines().next().unwrap_or_default().to_string(),
        }
    }

    async fn expect_status(response: reqwest::Response, ok: &[StatusCode]) -> BackendResult<()> {
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        if ok.contains(&response.status()) {
            Ok(())
        } else {
            Err(Self::into_error(response).await)
        }
    }

    async fn probe(&self, url: Url) -> BackendResult<bool> {
        let response = self.send(Method::HEAD, url, Vec::new(), Bytes::new()).await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::into_error(response).await),
        }
    }
}

#[async_trait]
impl BlobBackend for AzureBackend {
    fn account(&self) -> &str {
        &self.account
    }

    fn max_block_size(&self) -> usize {
        MAX_APPEND_BLOCK_SIZE
    }

    #[tracing::instrument(
        name = "azure.container_exists",
        skip(self),
        fields(
            azure.account = %self.account,
            azure.container = %container,
            http.method = "HEAD",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn container_exists(&self, container: &str) -> BackendResult<bool> {
        let url = self.container_url(container, "restype=container")?;
        self.probe(url).await
    }

    #[tracing::instrument(
        name = "azure.exists",
        skip(self),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "HEAD",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn exists(&self, container: &str, blob: &str) -> BackendResult<bool> {
        let url = self.blob_url(container, blob, None)?;
        self.probe(url).await
    }

    #[tracing::instrument(
        name = "azure.create_append_blob",
        skip(self),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "PUT",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn create_append_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        let url = self.blob_url(container, blob, None)?;
        let headers = vec![
            ("x-ms-blob-type".to_string(), "AppendBlob".to_string()),
            ("If-None-Match".to_string(), "*".to_string()),
        ];
        let response = self.send(Method::PUT, url, headers, Bytes::new()).await?;
        Self::expect_status(response, &[StatusCode::CREATED]).await
    }

    #[tracing::instrument(
        name = "azure.append_block",
        skip(self, data, lease_id),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "PUT",
            upload.bytes = data.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn append_block(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        lease_id: Option<&str>,
    ) -> BackendResult<()> {
        let url = self.blob_url(container, blob, Some("comp=appendblock"))?;
        let mut headers = Vec::new();
        if let Some(lease_id) = lease_id {
            headers.push(("x-ms-lease-id".to_string(), lease_id.to_string()));
        }
        let response = self.send(Method::PUT, url, headers, data).await?;
        Self::expect_status(response, &[StatusCode::CREATED]).await
    }

    #[tracing::instrument(
        name = "azure.acquire_lease",
        skip(self),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "PUT",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        proposed_id: &str,
    ) -> BackendResult<String> {
        let url = self.blob_url(container, blob, Some("comp=lease"))?;
        let headers = vec![
            ("x-ms-lease-action".to_string(), "acquire".to_string()),
            ("x-ms-lease-duration".to_string(), "-1".to_string()),
            ("x-ms-proposed-lease-id".to_string(), proposed_id.to_string()),
        ];
        let response = self.send(Method::PUT, url, headers, Bytes::new()).await?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        if response.status() != StatusCode::CREATED && response.status() != StatusCode::OK {
            return Err(Self::into_error(response).await);
        }

        Ok(response
            .headers()
            .get("x-ms-lease-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(proposed_id)
            .to_string())
    }

    #[tracing::instrument(
        name = "azure.release_lease",
        skip(self, lease_id),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "PUT",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BackendResult<()> {
        let url = self.blob_url(container, blob, Some("comp=lease"))?;
        let headers = vec![
            ("x-ms-lease-action".to_string(), "release".to_string()),
            ("x-ms-lease-id".to_string(), lease_id.to_string()),
        ];
        let response = self.send(Method::PUT, url, headers, Bytes::new()).await?;
        Self::expect_status(response, &[StatusCode::OK]).await
    }

    #[tracing::instrument(
        name = "azure.delete_if_exists",
        skip(self, lease_id),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "DELETE",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn delete_if_exists(
        &self,
        container: &str,
        blob: &str,
        lease_id: Option<&str>,
    ) -> BackendResult<()> {
        let url = self.blob_url(container, blob, None)?;
        let mut headers = vec![("x-ms-delete-snapshots".to_string(), "include".to_string())];
        if let Some(lease_id) = lease_id {
            headers.push(("x-ms-lease-id".to_string(), lease_id.to_string()));
        }
        let response = self.send(Method::DELETE, url, headers, Bytes::new()).await?;
        Self::expect_status(response, &[StatusCode::ACCEPTED, StatusCode::NOT_FOUND]).await
    }

    #[tracing::instrument(
        name = "azure.create_if_absent",
        skip(self, data),
        fields(
            azure.container = %container,
            azure.blob = %blob,
            http.method = "PUT",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn create_if_absent(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
    ) -> BackendResult<()> {
        let url = self.blob_url(container, blob, None)?;
        let headers = vec![
            ("x-ms-blob-type".to_string(), "BlockBlob".to_string()),
            ("If-None-Match".to_string(), "*".to_string()),
        ];
        let response = self.send(Method::PUT, url, headers, data).await?;
        Self::expect_status(response, &[StatusCode::CREATED]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> AzureBackendConfig {
        AzureBackendConfig {
            account: "myaccount".into(),
            key: "c2VjcmV0LWtleQ==".into(),
            endpoint: endpoint.map(str::to_string),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn test_default_endpoint() {
        let backend = AzureBackend::new(config(None)).unwrap();
        assert_eq!(backend.endpoint(), "https://myaccount.blob.core.windows.net");
        assert_eq!(backend.max_block_size(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_custom_endpoint_trailing_slash() {
        let backend =
            AzureBackend::new(config(Some("http://127.0.0.1:10000/myaccount/"))).unwrap();
        assert_eq!(backend.endpoint(), "http://127.0.0.1:10000/myaccount");
    }

    #[test]
    fn test_invalid_key() {
        let mut cfg = config(None);
        cfg.key = "%%%".into();
        assert!(matches!(
            AzureBackend::new(cfg),
            Err(AzureConfigError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_blob_url_encoding() {
        let backend = AzureBackend::new(config(None)).unwrap();
        let url = backend
            .blob_url("logs", "2026/10/app log.txt", Some("comp=appendblock"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://myaccount.blob.core.windows.net/logs/2026/10/app%20log.txt?comp=appendblock"
        );
    }

    #[test]
    fn test_error_body_parsing() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?><Error><Code>LeaseAlreadyPresent</Code><Message>There is already a lease present.
RequestId:0000
Time:2026-10-19T10:00:00.0000000Z</Message></Error>"#;
        let parsed: ErrorBody = quick_xml::de::from_str(body).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("LeaseAlreadyPresent"));
        assert!(parsed
            .message
            .unwrap()
            .starts_with("There is already a lease present."));
    }
}
