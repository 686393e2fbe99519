//! Signed HTTP transport shared by the S3, Textract and DynamoDB clients.
//!
//! Every request goes through [`AwsClient::send`], which signs it with
//! SigV4 and retries transient failures with exponential backoff:
//!
//! - HTTP 429 or 5xx → retry
//! - throttling error codes in a 400 body → retry
//! - other 4xx → returned to the caller immediately
//! - network error → retry

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AwsConfig, RetryConfig};
use crate::sigv4::{self, AwsCredentials, CanonicalRequest};

/// Error codes AWS services return with HTTP 400 that should be retried.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }
}

/// One request, before signing.
pub struct AwsRequest {
    pub method: Method,
    pub service: &'static str,
    /// Bucket for virtual-hosted S3 addressing; `None` for other services.
    pub bucket: Option<String>,
    /// Path after the host (and after the bucket, for S3), percent-encoded.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl AwsRequest {
    pub fn new(method: Method, service: &'static str) -> Self {
        Self {
            method,
            service,
            bucket: None,
            path: "/".to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A JSON-protocol `POST /` with `X-Amz-Target` set, as used by
    /// Textract and DynamoDB.
    pub fn json_rpc(
        service: &'static str,
        content_type: &str,
        target: &str,
        body: &serde_json::Value,
    ) -> Result<Self> {
        let mut req = Self::new(Method::POST, service);
        req.headers.push(("content-type".to_string(), content_type.to_string()));
        req.headers.push(("x-amz-target".to_string(), target.to_string()));
        req.body = serde_json::to_vec(body)?;
        Ok(req)
    }
}

/// Final response after retries.
#[derive(Debug)]
pub struct AwsResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct JsonError {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

impl AwsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Error code without its namespace, e.g.
    /// `com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException`
    /// becomes `ConditionalCheckFailedException`. Handles JSON `__type`
    /// bodies and XML `<Code>` bodies.
    pub fn error_code(&self) -> Option<String> {
        if let Ok(err) = serde_json::from_slice::<JsonError>(&self.body) {
            if let Some(t) = err.error_type {
                return Some(t.rsplit('#').next().unwrap_or(&t).to_string());
            }
        }
        let text = self.text();
        let start = text.find("<Code>")? + "<Code>".len();
        let end = text[start..].find("</Code>")? + start;
        Some(text[start..end].to_string())
    }

    /// Human-readable failure description for error messages.
    pub fn describe(&self) -> String {
        let message = serde_json::from_slice::<JsonError>(&self.body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| self.text());
        match self.error_code() {
            Some(code) => format!("HTTP {} {}: {}", self.status, code, message.trim()),
            None => format!("HTTP {}: {}", self.status, message.trim()),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        if self.status == 429 || self.status >= 500 {
            return true;
        }
        self.status == 400
            && self
                .error_code()
                .is_some_and(|code| THROTTLING_CODES.contains(&code.as_str()))
    }
}

/// Signing HTTP client for one region.
pub struct AwsClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    endpoint_url: Option<String>,
    retry: RetryPolicy,
}

impl AwsClient {
    pub fn new(
        aws: &AwsConfig,
        retry: &RetryConfig,
        timeout: Duration,
        credentials: AwsCredentials,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            credentials,
            region: aws.region.clone(),
            endpoint_url: aws
                .endpoint_url
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            retry: RetryPolicy::from_config(retry),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Scheme, host and full canonical path for `req`.
    ///
    /// With an endpoint override, S3 uses path-style addressing
    /// (`/bucket/key`); otherwise virtual-hosted (`bucket.s3.region...`).
    fn resolve(&self, req: &AwsRequest) -> (String, String, String) {
        match (&self.endpoint_url, &req.bucket) {
            (Some(endpoint), bucket) => {
                let (scheme, host) = endpoint
                    .split_once("://")
                    .map(|(s, h)| (s.to_string(), h.to_string()))
                    .unwrap_or_else(|| ("https".to_string(), endpoint.clone()));
                let path = match bucket {
                    Some(b) if req.path == "/" => format!("/{}", sigv4::uri_encode(b)),
                    Some(b) => format!("/{}{}", sigv4::uri_encode(b), req.path),
                    None => req.path.clone(),
                };
                (scheme, host, path)
            }
            (None, Some(bucket)) => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", bucket, self.region),
                req.path.clone(),
            ),
            (None, None) => (
                "https".to_string(),
                format!("{}.{}.amazonaws.com", req.service, self.region),
                req.path.clone(),
            ),
        }
    }

    /// Sign and send `req`, retrying transient failures.
    ///
    /// Returns the final response whatever its status; callers decide
    /// what a non-success status means. Errors only when every attempt
    /// failed at the network level.
    pub async fn send(&self, req: &AwsRequest) -> Result<AwsResponse> {
        let (scheme, host, path) = self.resolve(req);
        let mut last_err = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                debug!(service = req.service, attempt, ?delay, "retrying AWS request");
                tokio::time::sleep(delay).await;
            }

            let canonical = CanonicalRequest {
                method: req.method.as_str(),
                service: req.service,
                host: &host,
                path: &path,
                query: &req.query,
                headers: &req.headers,
                payload: &req.body,
            };
            let query = canonical.canonical_query();
            let auth = sigv4::sign(&self.credentials, &self.region, &canonical, Utc::now());

            let url = if query.is_empty() {
                format!("{}://{}{}", scheme, host, path)
            } else {
                format!("{}://{}{}?{}", scheme, host, path, query)
            };

            let mut builder = self.http.request(req.method.clone(), &url);
            for (name, value) in req.headers.iter().chain(auth.iter()) {
                builder = builder.header(name.as_str(), value.as_str());
            }

            match builder.body(req.body.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = match response.bytes().await {
                        Ok(bytes) => bytes.to_vec(),
                        Err(e) => {
                            last_err = Some(anyhow::Error::from(e));
                            continue;
                        }
                    };
                    let resp = AwsResponse { status, body };

                    if resp.is_transient() && attempt < self.retry.max_retries {
                        warn!(service = req.service, error = %resp.describe(), "transient AWS error");
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(service = req.service, error = %e, "AWS request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", req.service)))
    }
}
