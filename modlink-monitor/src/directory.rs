//! Client for the gateway directory service.
//!
//! The directory answers `GET /gateway` with a JSON array of gateway entries.
//! Only the `ipAddress` field of each entry is used.

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use modlink_common::parse_ipv4;

/// Errors raised while querying the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory returned HTTP {0}")]
    Status(u16),

    #[error("Malformed directory payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid gateway address '{0}'")]
    InvalidAddress(String),
}

/// One gateway as listed by the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEntry {
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
}

/// HTTP client for `http://{host}:{port}/gateway`.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    url: String,
}

impl DirectoryClient {
    /// Build a client; `timeout` bounds each request.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: format!("http://{}:{}/gateway", host, port),
        })
    }

    /// URL queried by [`list_peers`](Self::list_peers).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current gateway addresses.
    ///
    /// Every call is a fresh query; an empty list is a valid answer.
    pub async fn list_peers(&self) -> Result<Vec<Ipv4Addr>, DirectoryError> {
        let response = self.http.get(&self.url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let entries: Vec<GatewayEntry> = serde_json::from_slice(&body)?;

        let peers = entries
            .iter()
            .map(|entry| {
                parse_ipv4(&entry.ip_address)
                    .map_err(|_| DirectoryError::InvalidAddress(entry.ip_address.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(url = %self.url, count = peers.len(), "Directory listed gateways");
        Ok(peers)
    }

    /// Query until the directory lists at least one gateway.
    ///
    /// An empty answer is retried after `backoff`; errors are returned to the
    /// caller.
    pub async fn wait_for_peers(&self, backoff: Duration) -> Result<Vec<Ipv4Addr>, DirectoryError> {
        loop {
            let peers = self.list_peers().await?;
            if !peers.is_empty() {
                return Ok(peers);
            }

            warn!(
                url = %self.url,
                retry_in = ?backoff,
                "Directory lists no gateways, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let client = DirectoryClient::new("management", 8080, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "http://management:8080/gateway");
    }

    #[test]
    fn test_entry_ignores_metadata() {
        let entries: Vec<GatewayEntry> = serde_json::from_str(
            r#"[{"ipAddress": "10.8.0.2", "commonName": "gw-1", "online": true}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].ip_address, "10.8.0.2");
    }

    #[test]
    fn test_entry_requires_address() {
        let result: Result<Vec<GatewayEntry>, _> =
            serde_json::from_str(r#"[{"commonName": "gw-1"}]"#);
        assert!(result.is_err());
    }
}
