//! # Resynchronization Service
//!
//! Collapses bursts of resync triggers into one full-state refetch, applies
//! the authoritative snapshot without re-broadcasting it, and reports the
//! result to the sync state store.
//!
//! ## Flow
//!
//! 1. `trigger_resync` (re)starts a debounce timer; only the trailing trigger
//!    after a quiet period runs a resync.
//! 2. `perform_resync` fetches the snapshot, retrying with exponential
//!    backoff. A resync already in flight turns a new call into a no-op.
//!    With the `rest_api` method the snapshot comes from a REST GET. With
//!    `websocket` a `resync_request` is sent over the realtime transport and
//!    the attempt completes on the first `diagram_state` offered through
//!    [`ResyncService::offer_snapshot`] that is not behind the newest vector
//!    the server has announced.
//! 3. On success the surface content is replaced under remote suppression and
//!    the store records the server's update vector.
//!
//! Failures are reported, never escalated: breaker accounting belongs to the
//! rejection handler.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::operation_state::OperationStateManager;
use crate::client::sync::metrics::MetricsHandle;
use crate::client::sync::retry::RetryPolicy;
use crate::client::sync::sync_state::{ResyncCoordinator, SyncStateStore};
use crate::client::timer::Debouncer;
use crate::client::transport::{DiagramStateSource, DiagramSurface, RealtimeTransport, TransportError};
use crate::shared::config::SyncConfig;
use crate::shared::diagram::{DiagramSnapshot, UpdateVector};
use crate::shared::event::{Subscription, Topic};
use crate::shared::lock;
use crate::shared::message::{OutboundMessage, ResyncMethod};

/// Resync failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResyncError {
    #[error("a resync is already in flight")]
    AlreadyInFlight,
    #[error("resync failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: TransportError,
    },
    #[error("resync service has been disposed")]
    Disposed,
}

/// Published after every resync that actually ran
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncResult {
    pub success: bool,
    pub update_vector: Option<UpdateVector>,
    pub attempts: u32,
    pub cell_count: usize,
    pub error: Option<String>,
}

/// Dependencies of the resync service
pub struct ResyncDeps {
    pub store: Arc<SyncStateStore>,
    pub source: Arc<dyn DiagramStateSource>,
    pub realtime: Arc<dyn RealtimeTransport>,
    pub surface: Arc<dyn DiagramSurface>,
    pub operation_state: Arc<OperationStateManager>,
    pub metrics: MetricsHandle,
}

/// A websocket resync waiting for the server's snapshot
struct AwaitedSnapshot {
    min_vector: UpdateVector,
    reply: oneshot::Sender<DiagramSnapshot>,
}

/// Resynchronization service
pub struct ResyncService {
    store: Arc<SyncStateStore>,
    source: Arc<dyn DiagramStateSource>,
    realtime: Arc<dyn RealtimeTransport>,
    surface: Arc<dyn DiagramSurface>,
    operation_state: Arc<OperationStateManager>,
    metrics: MetricsHandle,
    policy: RetryPolicy,
    method: ResyncMethod,
    response_timeout: Duration,
    debounce: Duration,
    debouncer: Debouncer,
    awaited: Mutex<Option<AwaitedSnapshot>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    in_flight: AtomicBool,
    disposed: AtomicBool,
    results: Topic<ResyncResult>,
    this: Weak<ResyncService>,
}

impl ResyncService {
    pub fn new(deps: ResyncDeps, config: &SyncConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store: deps.store,
            source: deps.source,
            realtime: deps.realtime,
            surface: deps.surface,
            operation_state: deps.operation_state,
            metrics: deps.metrics,
            policy: RetryPolicy::from_config(config),
            method: config.resync_method,
            response_timeout: config.resync_response_timeout,
            debounce: config.resync_debounce,
            debouncer: Debouncer::new(),
            awaited: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            results: Topic::new(),
            this: this.clone(),
        })
    }

    /// Request a resync; bursts within the debounce window collapse into one
    pub fn trigger_resync(&self, reason: &str) {
        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!(reason, "[Resync] Ignoring trigger after dispose");
            return;
        }
        tracing::debug!(reason, "[Resync] Resync requested");

        let this = self.this.clone();
        self.debouncer.schedule(self.debounce, move || {
            let Some(service) = this.upgrade() else {
                return;
            };
            if service.disposed.load(Ordering::SeqCst) {
                return;
            }
            let runner = Arc::clone(&service);
            let handle = tokio::spawn(async move {
                // Outcome is published and logged inside perform_resync
                let _ = runner.perform_resync().await;
            });
            let mut tasks = lock(&service.tasks);
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        });
    }

    /// Fetch and apply authoritative state now
    pub async fn perform_resync(&self) -> Result<UpdateVector, ResyncError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ResyncError::Disposed);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("[Resync] Resync already in flight, skipping");
            return Err(ResyncError::AlreadyInFlight);
        }
        let _in_flight = InFlight(&self.in_flight);

        self.store.begin_resync();
        self.metrics.record(|m| m.record_resync_attempt());
        let started = Instant::now();
        tracing::info!(method = self.method.as_str(), "[Resync] Starting resync");

        let mut attempt = 0u32;
        let snapshot = loop {
            match self.fetch_snapshot().await {
                Ok(snapshot) => break snapshot,
                Err(error) => {
                    let retryable = !error.is_auth_failure()
                        && self.policy.should_retry(attempt)
                        && !self.disposed.load(Ordering::SeqCst);
                    if !retryable {
                        return Err(self.fail(attempt + 1, error));
                    }
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "[Resync] Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!("[Resync] Disposed while fetching, dropping snapshot");
            return Err(ResyncError::Disposed);
        }

        let update_vector = snapshot.update_vector;
        let cell_count = snapshot.cells.len();
        self.operation_state
            .with_remote_operation(|| self.surface.replace_cells(snapshot.cells));
        self.store.resync_complete(Some(update_vector));
        self.metrics.record(|m| m.record_resync_success(started));

        tracing::info!(
            update_vector = %update_vector,
            cell_count,
            attempts = attempt + 1,
            "[Resync] Applied authoritative state"
        );
        self.results.publish(ResyncResult {
            success: true,
            update_vector: Some(update_vector),
            attempts: attempt + 1,
            cell_count,
            error: None,
        });
        Ok(update_vector)
    }

    async fn fetch_snapshot(&self) -> Result<DiagramSnapshot, TransportError> {
        match self.method {
            ResyncMethod::RestApi => self.source.fetch_diagram_state().await,
            ResyncMethod::Websocket => self.request_over_realtime().await,
        }
    }

    async fn request_over_realtime(&self) -> Result<DiagramSnapshot, TransportError> {
        let min_vector = self.store.latest_server_vector();
        let (reply, response) = oneshot::channel();
        // Registered before sending so an immediate reply is not missed
        *lock(&self.awaited) = Some(AwaitedSnapshot { min_vector, reply });

        let result = async {
            self.realtime
                .send(OutboundMessage::resync_request(ResyncMethod::Websocket))
                .await?;
            tracing::debug!(min_vector = %min_vector, "[Resync] Requested state over realtime transport");
            match tokio::time::timeout(self.response_timeout, response).await {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::Timeout),
            }
        }
        .await;

        lock(&self.awaited).take();
        result
    }

    /// Hand a `diagram_state` message to a websocket resync waiting for it.
    ///
    /// Returns `true` if the snapshot completed the pending request.
    pub fn offer_snapshot(&self, snapshot: &DiagramSnapshot) -> bool {
        let mut awaited = lock(&self.awaited);
        match awaited.as_ref() {
            Some(pending) if !pending.min_vector.is_ahead_of(snapshot.update_vector) => {}
            Some(pending) => {
                tracing::debug!(
                    offered = %snapshot.update_vector,
                    wanted = %pending.min_vector,
                    "[Resync] Snapshot older than requested, still waiting"
                );
                return false;
            }
            None => return false,
        }
        match awaited.take() {
            Some(pending) => pending.reply.send(snapshot.clone()).is_ok(),
            None => false,
        }
    }

    fn fail(&self, attempts: u32, last_error: TransportError) -> ResyncError {
        tracing::error!(attempts, error = %last_error, "[Resync] Resync failed");
        self.store.resync_failed();
        self.metrics.record(|m| m.record_resync_failure());
        self.results.publish(ResyncResult {
            success: false,
            update_vector: None,
            attempts,
            cell_count: 0,
            error: Some(last_error.to_string()),
        });
        ResyncError::RetriesExhausted { attempts, last_error }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ResyncResult) + Send + Sync + 'static,
    {
        self.results.subscribe(handler)
    }

    pub fn results(&self) -> &Topic<ResyncResult> {
        &self.results
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether a debounced trigger is waiting to run
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Cancel the pending trigger and any running resync, and refuse new
    /// ones. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.debouncer.cancel();
            for task in lock(&self.tasks).drain(..) {
                task.abort();
            }
            lock(&self.awaited).take();
            tracing::debug!("[Resync] Disposed");
        }
    }
}

impl ResyncCoordinator for ResyncService {
    fn trigger_resync(&self, reason: &str) {
        ResyncService::trigger_resync(self, reason);
    }
}

impl fmt::Debug for ResyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncService")
            .field("method", &self.method)
            .field("in_flight", &self.is_in_flight())
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Clears the in-flight flag when the resync ends, including on cancellation
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
