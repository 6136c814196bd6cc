//! HTTP client for the Warden API server.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Success envelope returned by the management routes.
#[derive(Debug, serde::Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

/// Error envelope (`{"success": false, "error": {...}}`).
#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorInfo,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// Compatibility error shape of the `/permissions/*` routes.
#[derive(Debug, serde::Deserialize)]
struct CompatError {
    error: String,
}

/// How the CLI identifies itself to the server.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer token; takes precedence on the server.
    pub token: Option<String>,
    /// `x-user-id`, honored only by servers that trust the header.
    pub user: Option<String>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl ApiClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.credentials.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(user) = &self.credentials.user {
            builder = builder.header("x-user-id", user);
        }
        builder
    }

    /// Send a management request and unwrap the `ApiResponse` envelope.
    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&serde_json::Value>) -> Result<T> {
        let mut builder = self.request(method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        let status = resp.status();
        let bytes = resp.bytes().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(describe_failure(status, &bytes));
        }

        let api_resp: ApiResponse<T> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse response from {}", path))?;

        if !api_resp.success {
            anyhow::bail!("API reported failure for {}", path);
        }
        Ok(api_resp.data)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let body = serde_json::to_value(body).context("Failed to encode request body")?;
        self.send(Method::PUT, path, Some(&body)).await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::POST, path, None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::DELETE, path, None).await
    }

    /// POST to a route that answers with a bare JSON body rather than the
    /// envelope (the `/permissions/*` routes).
    pub async fn post_raw<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let resp = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;

        let status = resp.status();
        let bytes = resp.bytes().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(describe_failure(status, &bytes));
        }

        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse response from {}", path))
    }

    /// GET returning the full JSON value (for the health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        let status = resp.status();
        let bytes = resp.bytes().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(describe_failure(status, &bytes));
        }

        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse response from {}", path))
    }
}

/// Render any of the server's error shapes as one line.
fn describe_failure(status: StatusCode, body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        return format!("API error ({}) [{}]: {}", status, envelope.error.code, envelope.error.message);
    }
    if let Ok(compat) = serde_json::from_slice::<CompatError>(body) {
        return format!("API error ({}): {}", status, compat.error);
    }
    format!("API error ({}): {}", status, String::from_utf8_lossy(body))
}
