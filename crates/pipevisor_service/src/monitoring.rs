//! HTTP client for the engine's monitoring API.

use serde::Deserialize;
use std::time::Duration;

/// Error type for monitoring API requests.
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, MonitoringError>;

/// Node info returned by `GET /`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Client for the monitoring endpoint exposed by a running engine.
#[derive(Debug, Clone)]
pub struct MonitoringApi {
    base_url: String,
    client: reqwest::Client,
}

impl MonitoringApi {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MonitoringError::Client(e.to_string()))?;
        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch node info via GET /.
    pub async fn node_info(&self) -> Result<NodeInfo> {
        self.get_json(&format!("{}/", self.base_url)).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitoringError::Request(e.to_string()))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| MonitoringError::Request(e.to_string()))?;
        resp.json::<T>()
            .await
            .map_err(|e| MonitoringError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_uses_host_and_port() {
        let api = MonitoringApi::new("127.0.0.1", 9600).unwrap();
        assert_eq!(api.base_url(), "http://127.0.0.1:9600");
    }

    #[test]
    fn node_info_tolerates_missing_optional_fields() {
        let info: NodeInfo = serde_json::from_str(r#"{"version":"8.15.0"}"#).unwrap();
        assert_eq!(info.version, "8.15.0");
        assert!(info.host.is_empty());
        assert!(info.status.is_none());
    }

    #[tokio::test]
    async fn node_info_against_closed_port_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let api = MonitoringApi::new("127.0.0.1", port).unwrap();
        assert!(matches!(
            api.node_info().await,
            Err(MonitoringError::Request(_))
        ));
    }
}
