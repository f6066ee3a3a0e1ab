//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: Loaded once at startup, read-only afterwards
//! - **relay**: The [`RelayService`] that accepts browser sessions (explicitly
//!   constructed, no process-wide globals)
//! - **metrics**: Request counters plus relay totals, behind `Arc<RwLock<T>>`
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Every actix worker holds a reference to the same metrics
//! - **RwLock**: Many readers (the metrics endpoint) or one writer (the middleware,
//!   a finished bridge) at a time
//! - Locks are only held for the counter update itself, never across an `.await`

use crate::config::AppConfig;
use crate::error::{ConnectionError, RelayError};
use crate::relay::{BridgeSummary, RelayService, SessionRegistry, UpstreamTarget};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (never changes after startup)
    pub config: Arc<AppConfig>,

    /// Connection acceptance: upstream target plus the bridge registry
    pub relay: RelayService,

    /// Performance metrics (updated by middleware and finished bridges)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and bridges.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Per-endpoint statistics, keyed by "METHOD /route"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// Totals over every bridge that has finished
    pub relay: RelayMetrics,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Relay totals since server start.
///
/// ## Counting rules:
/// - A bridge that ran is counted once when it finishes, as completed or failed
///   depending on its teardown reason
/// - A connection that never became a bridge counts as an upstream failure
///   (dial refused) or a setup failure (capacity, session already closed)
#[derive(Debug, Default, Clone, Serialize)]
pub struct RelayMetrics {
    pub bridges_completed: u64,
    pub bridges_failed: u64,
    pub upstream_failures: u64,
    pub setup_failures: u64,
    pub frames_to_upstream: u64,
    pub bytes_to_upstream: u64,
    pub frames_to_client: u64,
    pub bytes_to_client: u64,
}

impl AppState {
    /// Build the state: wrap the config, create the registry sized from
    /// `relay.max_concurrent_bridges`, and the relay service on top of it.
    pub fn new(config: AppConfig) -> Self {
        let registry = SessionRegistry::with_capacity(config.relay.max_concurrent_bridges);
        let relay = RelayService::new(UpstreamTarget::from_config(&config), registry);

        Self {
            config: Arc::new(config),
            relay,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.relay.registry()
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: Route pattern with method (e.g., "GET /health")
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether this request resulted in an error status
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Fold the outcome of one served client connection into the relay totals.
    pub fn record_relay_outcome(&self, outcome: &Result<BridgeSummary, RelayError>) {
        let mut metrics = self.metrics_write();
        let relay = &mut metrics.relay;

        match outcome {
            Ok(summary) => {
                if summary.reason.is_error() {
                    relay.bridges_failed += 1;
                } else {
                    relay.bridges_completed += 1;
                }
                relay.frames_to_upstream += summary.client_to_upstream.frames;
                relay.bytes_to_upstream += summary.client_to_upstream.bytes;
                relay.frames_to_client += summary.upstream_to_client.frames;
                relay.bytes_to_client += summary.upstream_to_client.bytes;
            }
            Err(RelayError::Connection(_)) => relay.upstream_failures += 1,
            Err(RelayError::Setup(_)) => relay.setup_failures += 1,
        }
    }

    /// Count a connection turned away before a session was even created.
    pub fn record_refused_connection(&self) {
        self.metrics_write().relay.setup_failures += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Bridges currently relaying.
    pub fn active_bridges(&self) -> usize {
        self.registry().count()
    }

    /// Whether dials can succeed at all; the credential itself is never exposed.
    pub fn credential_configured(&self) -> bool {
        self.config.upstream.has_credential()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// Classify a dial failure for logs and metrics labels.
pub fn connection_failure_kind(err: &ConnectionError) -> &'static str {
    match err {
        ConnectionError::MissingCredential | ConnectionError::InvalidCredential => "credential",
        ConnectionError::InvalidEndpoint(_) => "endpoint",
        ConnectionError::Rejected { .. } => "rejected",
        ConnectionError::Timeout(_) => "timeout",
        ConnectionError::Transport(_) => "transport",
    }
}
