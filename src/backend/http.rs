//! HTTP backend client

use super::{BackendClient, BackendError, MetadataSource};
use crate::metadata::{AvailabilityRecord, SegmentInfo};
use crate::query::{BackendQuery, ResultSet};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Broker and coordinator over HTTP/JSON
///
/// Queries are POSTed to `{broker}/query`. Metadata is read from
/// `{coordinator}/datasources/{dataset}/...`. 5xx responses and connection
/// failures are transport errors; 4xx responses are rejections.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    broker_url: String,
    coordinator_url: String,
}

impl HttpBackend {
    pub fn new(broker_url: &str, coordinator_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            broker_url: broker_url.trim_end_matches('/').to_string(),
            coordinator_url: coordinator_url.trim_end_matches('/').to_string(),
        })
    }

    fn datasource_url(&self, dataset: &str, path: &str) -> String {
        format!("{}/datasources/{}/{}", self.coordinator_url, dataset, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> std::result::Result<T, BackendError> {
        debug!(url = %url, "Fetching backend metadata");
        let response = self.client.get(&url).send().await.map_err(transport)?;
        decode(check_status(response).await?).await
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn check_status(response: Response) -> std::result::Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body);
    if status.is_server_error() {
        Err(BackendError::Transport(message))
    } else {
        Err(BackendError::Rejected(message))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> std::result::Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Rejected(format!("malformed backend response: {}", e)))
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn execute(&self, query: &BackendQuery) -> std::result::Result<ResultSet, BackendError> {
        let url = format!("{}/query", self.broker_url);
        let response = self
            .client
            .post(&url)
            .json(query)
            .send()
            .await
            .map_err(transport)?;
        decode(check_status(response).await?).await
    }
}

#[async_trait]
impl MetadataSource for HttpBackend {
    async fn fetch_segments(
        &self,
        dataset: &str,
    ) -> std::result::Result<AvailabilityRecord, BackendError> {
        self.get_json(self.datasource_url(dataset, "availability"))
            .await
    }

    async fn fetch_datasource_metadata(
        &self,
        dataset: &str,
    ) -> std::result::Result<Vec<SegmentInfo>, BackendError> {
        self.get_json(self.datasource_url(dataset, "segments")).await
    }

    async fn fetch_dimension_values(
        &self,
        dataset: &str,
        dimension: &str,
    ) -> std::result::Result<Vec<String>, BackendError> {
        self.get_json(self.datasource_url(dataset, &format!("dimensions/{}/values", dimension)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_normalized() {
        let backend = HttpBackend::new(
            "http://broker:8082/",
            "http://coordinator:8081/druid/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            backend.datasource_url("events", "segments"),
            "http://coordinator:8081/druid/datasources/events/segments"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport() {
        let backend = HttpBackend::new(
            "http://127.0.0.1:1",
            "http://127.0.0.1:1",
            Duration::from_millis(500),
        )
        .unwrap();
        let err = backend.fetch_segments("events").await.unwrap_err();
        assert!(err.is_transient());
    }
}
