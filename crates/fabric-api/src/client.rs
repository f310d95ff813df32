//! ---
//! fabric_section: "07-admin-api"
//! fabric_subsection: "module"
//! fabric_type: "source"
//! fabric_scope: "code"
//! fabric_description: "HTTP client for the admin API."
//! fabric_version: "v0.0.0-prealpha"
//! fabric_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use fabric_resilience::FaultTarget;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{CommandRequest, ElementsRequest, ErrorResponse, HealthResponse};

/// Recoveries wait for daemon readiness, so the timeout is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: String,
    http: Client,
}

impl ApiClient {
    /// `endpoint` is a base URL such as `http://127.0.0.1:8080`; a bare `host:port` is
    /// accepted too.
    pub fn new(endpoint: &str) -> Result<Self> {
        let trimmed = endpoint.trim_end_matches('/');
        let base = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("http://{trimmed}")
        };
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { base, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    pub async fn healthz(&self) -> Result<HealthResponse> {
        self.get("/healthz").await
    }

    pub async fn status(&self) -> Result<Value> {
        self.get("/api/status").await
    }

    pub async fn fail(&self, elements: &[String]) -> Result<Value> {
        self.post(
            "/api/fail",
            &ElementsRequest {
                elements: elements.to_vec(),
            },
        )
        .await
    }

    pub async fn recover(&self, elements: &[String]) -> Result<Value> {
        self.post(
            "/api/recover",
            &ElementsRequest {
                elements: elements.to_vec(),
            },
        )
        .await
    }

    /// Send one command line such as `kill-daemon bgp1`.
    pub async fn command(&self, line: &str) -> Result<Value> {
        self.post(
            "/api/command",
            &CommandRequest {
                command: line.to_owned(),
            },
        )
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        decode(&url, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        decode(&url, response).await
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_owned(),
        };
        bail!("{url} returned {}: {message}", status.as_u16());
    }
    response
        .json()
        .await
        .with_context(|| format!("failed to decode response from {url}"))
}

#[async_trait]
impl FaultTarget for ApiClient {
    async fn execute(&self, command: &str) -> Result<Value> {
        self.command(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_gets_a_scheme() {
        assert_eq!(
            ApiClient::new("127.0.0.1:8080").unwrap().endpoint(),
            "http://127.0.0.1:8080"
        );
        assert_eq!(
            ApiClient::new("https://fabric.lab/").unwrap().endpoint(),
            "https://fabric.lab"
        );
    }
}
