use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::chunks::ChunkDecoder;
use super::types::{GraphData, GraphQueryRequest, QueryRequest, QueryResponse};
use super::{ChunkReceiver, GraphService, ReasoningService, CHUNK_CHANNEL_CAPACITY};
use crate::abort::AbortSignal;
use crate::config::{BackendConfig, RequestConfig};
use crate::error::{BackendError, BackendResult};

const STREAM_PATH: &str = "/api/query/stream";
const QUERY_PATH: &str = "/api/query";
const GRAPH_QUERY_PATH: &str = "/api/graph/query";

/// HTTP client for the reasoning backend
#[derive(Clone)]
pub struct BackendClient {
    /// Bounded by the request timeout.
    client: Client,
    /// Connect timeout only; an open stream may stay silent indefinitely.
    stream_client: Client,
    base_url: String,
    api_key: Option<String>,
    request_config: RequestConfig,
}

impl BackendClient {
    /// Create a new backend client
    pub fn new(config: &BackendConfig, request_config: RequestConfig) -> BackendResult<Self> {
        let timeout = Duration::from_millis(request_config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Http)?;
        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            BackendError::Http(e)
        }
    }

    async fn check_status(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }
        Ok(response)
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> BackendResult<T> {
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("Failed to parse {} response: {}", what, e),
            })
    }

    /// Single graph query attempt (internal)
    async fn execute_graph_query(&self, request: &GraphQueryRequest) -> BackendResult<GraphData> {
        let url = format!("{}{}", self.base_url, GRAPH_QUERY_PATH);
        debug!(
            entity = %request.entity_name,
            depth = request.depth,
            limit = request.limit,
            "Querying knowledge graph"
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;
        Self::parse_json(response, "graph query").await
    }

    fn node_details_url(&self, lookup_key: &str) -> BackendResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| BackendError::InvalidUrl {
            message: format!("{}: {}", self.base_url, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl {
                message: format!("{} cannot be a base URL", self.base_url),
            })?
            .pop_if_empty()
            .extend(["api", "graph", "node", lookup_key, "details"]);
        Ok(url)
    }
}

#[async_trait]
impl ReasoningService for BackendClient {
    async fn open_stream(
        &self,
        request: &QueryRequest,
        mut signal: AbortSignal,
    ) -> BackendResult<ChunkReceiver> {
        let url = format!("{}{}", self.base_url, STREAM_PATH);
        debug!(query_len = request.query.len(), "Opening query stream");

        let send = self
            .authorized(self.stream_client.post(&url))
            .header("Accept", "application/x-ndjson, text/event-stream")
            .json(request)
            .send();

        let response = signal
            .guard(send)
            .await
            .map_err(|reason| BackendError::Aborted { reason })?
            .map_err(|e| self.map_send_error(e))?;
        let mut response = Self::check_status(response).await?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut decoder = ChunkDecoder::new();
            let started = Instant::now();
            loop {
                let next = tokio::select! {
                    biased;
                    reason = signal.aborted() => {
                        debug!(reason = %reason, "Stream reader stopped by abort");
                        return;
                    }
                    _ = tx.closed() => {
                        debug!("Stream receiver dropped, closing query stream");
                        return;
                    }
                    next = response.chunk() => next,
                };

                match next {
                    Ok(Some(bytes)) => {
                        for chunk in decoder.push(&bytes) {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        for chunk in decoder.finish() {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        debug!(
                            elapsed_ms = started.elapsed().as_millis(),
                            skipped = decoder.skipped(),
                            "Query stream ended"
                        );
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "Query stream read failed");
                        let _ = tx
                            .send(Err(BackendError::Stream {
                                message: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn query(
        &self,
        request: &QueryRequest,
        mut signal: AbortSignal,
    ) -> BackendResult<QueryResponse> {
        let url = format!("{}{}", self.base_url, QUERY_PATH);
        let start = Instant::now();

        let send = async {
            let response = self
                .authorized(self.client.post(&url))
                .json(request)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;
            let response = Self::check_status(response).await?;
            Self::parse_json::<QueryResponse>(response, "query").await
        };

        let result = signal
            .guard(send)
            .await
            .map_err(|reason| BackendError::Aborted { reason })?;

        match &result {
            Ok(_) => info!(
                latency_ms = start.elapsed().as_millis(),
                "Plain query succeeded"
            ),
            Err(e) => error!(
                error = %e,
                latency_ms = start.elapsed().as_millis(),
                "Plain query failed"
            ),
        }
        result
    }
}

#[async_trait]
impl GraphService for BackendClient {
    async fn query_graph(&self, request: &GraphQueryRequest) -> BackendResult<GraphData> {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    entity = %request.entity_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying graph query"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_graph_query(request).await {
                Ok(graph) => {
                    info!(
                        entity = %request.entity_name,
                        nodes = graph.nodes.len(),
                        edges = graph.edges.len(),
                        latency_ms = start.elapsed().as_millis(),
                        "Graph query succeeded"
                    );
                    return Ok(graph);
                }
                // Client errors will not improve on retry.
                Err(e @ BackendError::Api { status: 400..=499, .. }) => return Err(e),
                Err(e) => {
                    error!(
                        entity = %request.entity_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Graph query failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(BackendError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn node_details(&self, lookup_key: &str, node_type: &str) -> BackendResult<Value> {
        let url = self.node_details_url(lookup_key)?;
        debug!(key = %lookup_key, node_type = %node_type, "Fetching node details");

        let response = self
            .authorized(self.client.get(url))
            .query(&[("node_type", node_type)])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;
        Self::parse_json(response, "node details").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> BackendClient {
        let config = BackendConfig {
            base_url: base_url.to_string(),
            api_key: None,
        };
        BackendClient::new(&config, RequestConfig::default()).unwrap()
    }

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        assert_eq!(client("http://localhost:8000/").base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_node_details_url_escapes_key() {
        let url = client("http://localhost:8000")
            .node_details_url("binary search/variant")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/graph/node/binary%20search%2Fvariant/details"
        );
    }

    #[test]
    fn test_node_details_url_keeps_base_path() {
        let url = client("http://localhost:8000/assistant")
            .node_details_url("n1")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/assistant/api/graph/node/n1/details"
        );
    }
}
