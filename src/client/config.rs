use crate::shared::config::{ConfigError, SyncConfig};

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Client configuration: where the diagram lives and how to reach it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    server_url: String,
    token: Option<String>,
    threat_model_id: String,
    diagram_id: String,
    sync: SyncConfig,
}

impl ClientConfig {
    /// Configuration for one diagram, with the server URL taken from
    /// `CLIENT_API_URL` when set
    pub fn new(threat_model_id: impl Into<String>, diagram_id: impl Into<String>) -> Self {
        let server_url = std::env::var("CLIENT_API_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            token: None,
            threat_model_id: threat_model_id.into(),
            diagram_id: diagram_id.into(),
            sync: SyncConfig::default(),
        }
    }

    /// Override the server URL
    pub fn with_server_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url));
        }
        self.server_url = url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_sync_config(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Set the bearer token
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn get_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Clear the token (logout)
    pub fn clear_token(&mut self) {
        self.token = None;
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn threat_model_id(&self) -> &str {
        &self.threat_model_id
    }

    pub fn diagram_id(&self) -> &str {
        &self.diagram_id
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.sync
    }

    /// Path of the diagram resource
    pub fn diagram_path(&self) -> String {
        format!("/threat_models/{}/diagrams/{}", self.threat_model_id, self.diagram_id)
    }

    /// Path of the diagram's collaboration session resource
    pub fn collaborate_path(&self) -> String {
        format!("{}/collaborate", self.diagram_path())
    }
}
