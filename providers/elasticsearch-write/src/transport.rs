//! Bulk request transport

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::bulk::BulkResponse;
use crate::config::WriterConfig;
use crate::error::{Result, WriterError};

/// Sends one encoded bulk payload and returns the parsed response.
///
/// Implementations must not retry: a failed request is reported to the
/// writer as is and the whole batch fails.
#[async_trait]
pub trait BulkTransport: Send + Sync + 'static {
    async fn send_bulk(&self, payload: Vec<u8>) -> Result<BulkResponse>;
}

/// reqwest based bulk client rotating over the configured endpoints
pub struct HttpBulkClient {
    client: Client,
    urls: Vec<String>,
    next: AtomicUsize,
}

impl HttpBulkClient {
    pub fn new(config: &WriterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| WriterError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Self::with_client(client, config.urls.clone())
    }

    /// Use a caller supplied client (TLS, proxies and pooling stay external)
    pub fn with_client(client: Client, urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            return Err(WriterError::Config("at least one URL is required".to_string()));
        }

        Ok(Self {
            client,
            urls: urls
                .into_iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            next: AtomicUsize::new(0),
        })
    }

    fn bulk_url(&self) -> String {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.urls.len();
        format!("{}/_bulk", self.urls[slot])
    }
}

#[async_trait]
impl BulkTransport for HttpBulkClient {
    async fn send_bulk(&self, payload: Vec<u8>) -> Result<BulkResponse> {
        let url = self.bulk_url();
        let start = Instant::now();
        let size = payload.len();

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(|e| WriterError::Transport(format!("Bulk request to {} failed: {}", url, e)))?;

        let status = response.status();
        debug!(
            "Bulk response from {}: status={}, bytes_sent={}, duration={}ms",
            url,
            status.as_u16(),
            size,
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Bulk request rejected with status {}", status.as_u16());
            return Err(WriterError::Transport(format!(
                "Bulk request returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| WriterError::Transport(format!("Invalid bulk response body: {}", e)))
    }
}

#[async_trait]
impl<T: BulkTransport> BulkTransport for std::sync::Arc<T> {
    async fn send_bulk(&self, payload: Vec<u8>) -> Result<BulkResponse> {
        (**self).send_bulk(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotates_over_urls() {
        let client = HttpBulkClient::with_client(
            Client::new(),
            vec!["http://es-1:9200/".to_string(), "http://es-2:9200".to_string()],
        )
        .unwrap();

        assert_eq!(client.bulk_url(), "http://es-1:9200/_bulk");
        assert_eq!(client.bulk_url(), "http://es-2:9200/_bulk");
        assert_eq!(client.bulk_url(), "http://es-1:9200/_bulk");
    }

    #[test]
    fn test_requires_an_url() {
        assert!(matches!(
            HttpBulkClient::with_client(Client::new(), vec![]),
            Err(WriterError::Config(_))
        ));
    }
}
