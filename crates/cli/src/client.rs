//! API client for the provisioner management API

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the provisioner daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        let present: Vec<_> = query
            .iter()
            .filter_map(|(k, v)| v.map(|v| (*k, v)))
            .collect();
        if !present.is_empty() {
            url.query_pairs_mut().extend_pairs(present);
        }
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, Option<&str>)]) -> Result<T> {
        let url = self.url(path, query)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path, &[])?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, error_message(&body));
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn allowed_instances(
        &self,
        tool: Option<&str>,
        region: Option<&str>,
        all: bool,
    ) -> Result<AllowedInstances> {
        let all = all.then_some("true");
        self.get(
            "api/v1/allowed-instances",
            &[("toolId", tool), ("regionId", region), ("all", all)],
        )
        .await
    }

    pub async fn catalog(&self, region: Option<&str>) -> Result<Catalog> {
        self.get("api/v1/catalog", &[("regionId", region)]).await
    }

    pub async fn attempts(&self) -> Result<Attempts> {
        self.get("api/v1/attempts", &[]).await
    }

    pub async fn runs(&self) -> Result<Vec<Run>> {
        self.get("api/v1/runs", &[]).await
    }

    pub async fn register_run(&self, run: &serde_json::Value) -> Result<Run> {
        self.post("api/v1/runs", run).await
    }
}

/// The `error` field of an error body, or the body itself
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.to_string())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedInstances {
    pub region: String,
    pub catalog_generation: u64,
    pub instance_types: Vec<String>,
    pub docker_instance_types: Vec<String>,
    pub price_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offering {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub region: String,
    pub price_model: String,
    #[serde(rename = "vCPU")]
    pub vcpu: u32,
    #[serde(rename = "memoryGB")]
    pub memory_gb: f64,
    #[serde(default)]
    pub gpu_count: u32,
    pub price_per_unit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub generation: u64,
    pub fingerprint: String,
    pub regions: Vec<String>,
    pub offerings: Vec<Offering>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptState {
    pub total_attempts: u32,
    pub spot_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempts {
    pub attempts: BTreeMap<String, AttemptState>,
    #[serde(default)]
    pub exhausted: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInstance {
    pub node_type: String,
    pub disk_gb: u32,
    #[serde(default)]
    pub spot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub owner: String,
    pub instance: RunInstance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_allowed_instances_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/allowed-instances")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("toolId".into(), "7".into()),
                Matcher::UrlEncoded("all".into(), "true".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"region":"us-east-1","catalogGeneration":3,"instanceTypes":["m5.large"],
                    "dockerInstanceTypes":["m5.large"],"priceTypes":["spot","on_demand"]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let allowed = client
            .allowed_instances(Some("7"), None, true)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(allowed.catalog_generation, 3);
        assert_eq!(allowed.price_types, vec!["spot", "on_demand"]);
    }

    #[tokio::test]
    async fn test_error_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/runs")
            .with_status(400)
            .with_body(r#"{"error":"run id must not be empty"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .register_run(&serde_json::json!({"id": ""}))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("run id must not be empty"));
    }

    #[tokio::test]
    async fn test_attempts_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/attempts")
            .with_body(
                r#"{"attempts":{"12":{"totalAttempts":2,"spotAttempts":1}},"exhausted":["9"]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let attempts = client.attempts().await.unwrap();

        assert_eq!(attempts.attempts["12"].total_attempts, 2);
        assert_eq!(attempts.exhausted, vec!["9"]);
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
