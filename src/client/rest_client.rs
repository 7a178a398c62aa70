/**
 * Diagram REST Client
 *
 * HTTP access to the diagram resource, used for resync fetches, the save
 * fallback and leaving collaboration:
 *
 * - `GET    /threat_models/{tm}/diagrams/{id}`              full diagram
 * - `PATCH  /threat_models/{tm}/diagrams/{id}`              JSON Patch of cells
 * - `DELETE /threat_models/{tm}/diagrams/{id}/collaborate`  end collaboration
 *
 * Requests carry the configured bearer token. 401 and 403 map to
 * authentication failures so callers never retry or reroute them.
 */

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::client::config::ClientConfig;
use crate::client::transport::{CollaborationControl, DiagramPersistence, DiagramStateSource, TransportError};
use crate::shared::diagram::{Cell, DiagramSnapshot, UpdateVector};

/// Diagram resource as returned by the API
#[derive(Debug, Deserialize)]
struct DiagramResponse {
    id: String,
    #[serde(default)]
    update_vector: Option<UpdateVector>,
    #[serde(default)]
    cells: Vec<Cell>,
}

/// One JSON Patch operation
#[derive(Debug, Serialize)]
struct PatchOperation<'a> {
    op: &'static str,
    path: &'static str,
    value: &'a [Cell],
}

/// REST client for one diagram
#[derive(Debug, Clone)]
pub struct RestDiagramApi {
    config: ClientConfig,
    client: Client,
}

impl RestDiagramApi {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn with_client(config: ClientConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.get_token() {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(TransportError::from_status(status.as_u16(), error_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl DiagramStateSource for RestDiagramApi {
    async fn fetch_diagram_state(&self) -> Result<DiagramSnapshot, TransportError> {
        let url = self.config.api_url(&self.config.diagram_path());
        tracing::debug!(url = %url, "[Resync] Fetching diagram");

        let response = self.send(self.client.get(&url)).await?;
        let diagram: DiagramResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        Ok(DiagramSnapshot {
            diagram_id: diagram.id,
            update_vector: diagram.update_vector.unwrap_or_default(),
            cells: diagram.cells,
        })
    }
}

#[async_trait]
impl DiagramPersistence for RestDiagramApi {
    async fn save_cells(&self, cells: &[Cell]) -> Result<(), TransportError> {
        let url = self.config.api_url(&self.config.diagram_path());
        let patch = [PatchOperation {
            op: "replace",
            path: "/cells",
            value: cells,
        }];
        tracing::debug!(url = %url, cell_count = cells.len(), "[Save] PATCH diagram cells");

        self.send(
            self.client
                .patch(&url)
                .header("Content-Type", "application/json-patch+json")
                .json(&patch),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CollaborationControl for RestDiagramApi {
    async fn end_collaboration(&self) -> Result<(), TransportError> {
        let url = self.config.api_url(&self.config.collaborate_path());
        self.send(self.client.delete(&url)).await?;
        tracing::info!(diagram_id = %self.config.diagram_id(), "[Session] Left collaboration");
        Ok(())
    }
}
