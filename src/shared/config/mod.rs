//! Sync engine configuration module
//!
//! Timing windows, thresholds and retry policy used by the synchronization
//! engine. Values are built with `SyncConfig::builder()` or loaded from a TOML
//! file where every duration is given in milliseconds:
//!
//! ```toml
//! notification_batch_window_ms = 2000
//! max_rejections_per_window = 5
//! resync_method = "rest_api"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::shared::message::ResyncMethod;

/// File name looked up under the platform config directory
const CONFIG_FILE: &str = "sync.toml";
const CONFIG_DIR: &str = "xfcollab";

/// Synchronization engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Rejections arriving within this window become one notice
    pub notification_batch_window: Duration,
    /// Sliding window for rejection accounting
    pub rejection_window: Duration,
    /// Breaker trips once the window holds more than this many rejections
    pub max_rejections_per_window: usize,
    /// Sliding window for resync accounting
    pub resync_window: Duration,
    /// Breaker trips once the window holds more than this many resyncs
    pub max_resyncs_per_window: usize,
    /// Quiet period before a burst of resync triggers runs one resync
    pub resync_debounce: Duration,
    /// Retries after the first failed fetch
    pub resync_max_retries: u32,
    /// Base delay for exponential backoff between fetch attempts
    pub resync_retry_delay: Duration,
    /// How full state is fetched
    pub resync_method: ResyncMethod,
    /// How long a websocket resync waits for the server's snapshot
    pub resync_response_timeout: Duration,
    /// Quiet period that finalizes a drag
    pub drag_debounce: Duration,
    /// Realtime save timeout before falling back to REST
    pub save_timeout: Duration,
    /// Commands from different users on the same cell within this window conflict
    pub conflict_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            notification_batch_window: Duration::from_millis(2_000),
            rejection_window: Duration::from_secs(60),
            max_rejections_per_window: 5,
            resync_window: Duration::from_secs(60),
            max_resyncs_per_window: 3,
            resync_debounce: Duration::from_millis(1_000),
            resync_max_retries: 3,
            resync_retry_delay: Duration::from_millis(1_000),
            resync_method: ResyncMethod::RestApi,
            resync_response_timeout: Duration::from_secs(10),
            drag_debounce: Duration::from_millis(150),
            save_timeout: Duration::from_secs(15),
            conflict_window: Duration::from_millis(1_000),
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("notification_batch_window", self.notification_batch_window),
            ("rejection_window", self.rejection_window),
            ("resync_window", self.resync_window),
            ("resync_response_timeout", self.resync_response_timeout),
            ("drag_debounce", self.drag_debounce),
            ("save_timeout", self.save_timeout),
            ("conflict_window", self.conflict_window),
        ];
        for (field, value) in windows {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.max_rejections_per_window == 0 {
            return Err(ConfigError::invalid("max_rejections_per_window", "must be at least 1"));
        }
        if self.max_resyncs_per_window == 0 {
            return Err(ConfigError::invalid("max_resyncs_per_window", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse a TOML document, filling unspecified values with defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: SyncConfigFile = toml::from_str(raw)?;
        file.into_builder().build()
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load `<config dir>/xfcollab/sync.toml`, or defaults when it does not exist
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "[Config] Loading sync configuration");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Platform location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn notification_batch_window(mut self, window: Duration) -> Self {
        self.config.notification_batch_window = window;
        self
    }

    pub fn rejection_window(mut self, window: Duration) -> Self {
        self.config.rejection_window = window;
        self
    }

    pub fn max_rejections_per_window(mut self, max: usize) -> Self {
        self.config.max_rejections_per_window = max;
        self
    }

    pub fn resync_window(mut self, window: Duration) -> Self {
        self.config.resync_window = window;
        self
    }

    pub fn max_resyncs_per_window(mut self, max: usize) -> Self {
        self.config.max_resyncs_per_window = max;
        self
    }

    pub fn resync_debounce(mut self, debounce: Duration) -> Self {
        self.config.resync_debounce = debounce;
        self
    }

    pub fn resync_max_retries(mut self, retries: u32) -> Self {
        self.config.resync_max_retries = retries;
        self
    }

    pub fn resync_retry_delay(mut self, delay: Duration) -> Self {
        self.config.resync_retry_delay = delay;
        self
    }

    pub fn resync_method(mut self, method: ResyncMethod) -> Self {
        self.config.resync_method = method;
        self
    }

    pub fn resync_response_timeout(mut self, timeout: Duration) -> Self {
        self.config.resync_response_timeout = timeout;
        self
    }

    pub fn drag_debounce(mut self, debounce: Duration) -> Self {
        self.config.drag_debounce = debounce;
        self
    }

    pub fn save_timeout(mut self, timeout: Duration) -> Self {
        self.config.save_timeout = timeout;
        self
    }

    pub fn conflict_window(mut self, window: Duration) -> Self {
        self.config.conflict_window = window;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// On-disk representation; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncConfigFile {
    notification_batch_window_ms: Option<u64>,
    rejection_window_ms: Option<u64>,
    max_rejections_per_window: Option<usize>,
    resync_window_ms: Option<u64>,
    max_resyncs_per_window: Option<usize>,
    resync_debounce_ms: Option<u64>,
    resync_max_retries: Option<u32>,
    resync_retry_delay_ms: Option<u64>,
    resync_method: Option<ResyncMethod>,
    resync_response_timeout_ms: Option<u64>,
    drag_debounce_ms: Option<u64>,
    save_timeout_ms: Option<u64>,
    conflict_window_ms: Option<u64>,
}

impl SyncConfigFile {
    fn into_builder(self) -> SyncConfigBuilder {
        let mut builder = SyncConfig::builder();
        let ms = Duration::from_millis;

        if let Some(v) = self.notification_batch_window_ms {
            builder = builder.notification_batch_window(ms(v));
        }
        if let Some(v) = self.rejection_window_ms {
            builder = builder.rejection_window(ms(v));
        }
        if let Some(v) = self.max_rejections_per_window {
            builder = builder.max_rejections_per_window(v);
        }
        if let Some(v) = self.resync_window_ms {
            builder = builder.resync_window(ms(v));
        }
        if let Some(v) = self.max_resyncs_per_window {
            builder = builder.max_resyncs_per_window(v);
        }
        if let Some(v) = self.resync_debounce_ms {
            builder = builder.resync_debounce(ms(v));
        }
        if let Some(v) = self.resync_max_retries {
            builder = builder.resync_max_retries(v);
        }
        if let Some(v) = self.resync_retry_delay_ms {
            builder = builder.resync_retry_delay(ms(v));
        }
        if let Some(v) = self.resync_method {
            builder = builder.resync_method(v);
        }
        if let Some(v) = self.resync_response_timeout_ms {
            builder = builder.resync_response_timeout(ms(v));
        }
        if let Some(v) = self.drag_debounce_ms {
            builder = builder.drag_debounce(ms(v));
        }
        if let Some(v) = self.save_timeout_ms {
            builder = builder.save_timeout(ms(v));
        }
        if let Some(v) = self.conflict_window_ms {
            builder = builder.conflict_window(ms(v));
        }
        builder
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
