//! HTTP client for the graph server.
//!
//! Speaks the `/api/v1/graphs/{name}` contract: `GET` returns
//! `{ "data": GraphSnapshot }`, `PUT` returns `{ "data": SaveAck }` or a 409
//! `{ "code": "VERSION_CONFLICT", "current": GraphSnapshot }`.

use std::time::Duration;

use async_trait::async_trait;
use graphsync_core::graph::{GraphSnapshot, SaveAck, SavePayload};
use graphsync_core::store::{ConflictResponse, VERSION_CONFLICT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::{GatewayError, PersistenceGateway, SaveOutcome};

/// Default request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// HTTP gateway for a single graph on a single server.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    graph_url: Url,
    graph_name: String,
}

impl HttpGateway {
    /// Create a gateway for `graph_name` on the server at `base_url`
    /// (e.g. `http://host:3000`).
    pub fn new(base_url: &str, graph_name: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(client, base_url, graph_name)
    }

    /// Create a gateway reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        graph_name: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let graph_name = graph_name.into();
        let graph_url = graph_url(base_url, &graph_name)?;
        Ok(Self {
            client,
            graph_url,
            graph_name,
        })
    }

    pub fn url(&self) -> &Url {
        &self.graph_url
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`GatewayError::Api`] with the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful `{ "data": T }` body.
    async fn parse_data<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice::<DataEnvelope<T>>(&bytes)
            .map(|envelope| envelope.data)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn parse_conflict(response: reqwest::Response) -> Result<GraphSnapshot, GatewayError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        match serde_json::from_str::<ConflictResponse>(&body) {
            Ok(conflict) if conflict.code == VERSION_CONFLICT => Ok(conflict.current),
            _ => Err(GatewayError::Api { status, body }),
        }
    }

    async fn try_save(&self, payload: &SavePayload) -> Result<SaveOutcome, GatewayError> {
        let response = self
            .client
            .put(self.graph_url.clone())
            .json(payload)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let current = Self::parse_conflict(response).await?;
            return Ok(SaveOutcome::Conflict { current });
        }

        let ack: SaveAck = Self::parse_data(response).await?;
        Ok(SaveOutcome::Saved(ack))
    }
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    fn graph_name(&self) -> &str {
        &self.graph_name
    }

    async fn load(&self) -> Result<GraphSnapshot, GatewayError> {
        let response = self.client.get(self.graph_url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(self.graph_name.clone()));
        }
        Self::parse_data(response).await
    }

    async fn save(&self, payload: SavePayload) -> SaveOutcome {
        match self.try_save(&payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(graph = %self.graph_name, version = payload.version, error = %e, "Graph save failed");
                SaveOutcome::TransportError(e)
            }
        }
    }
}

/// `{base}/api/v1/graphs/{name}` with the name percent-encoded as one segment.
fn graph_url(base_url: &str, graph_name: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base_url).map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::InvalidUrl(format!("{base_url}: cannot be a base")))?
        .pop_if_empty()
        .extend(["api", "v1", "graphs", graph_name]);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
