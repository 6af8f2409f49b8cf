//! Metrics collection and the optional HTTP exposition endpoint.
//!
//! Components take an `Arc<dyn Metrics>` explicitly instead of touching
//! process-wide counters; tests inject [`NoopMetrics`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Counter sink incremented by the sender and collector cores.
pub trait Metrics: Send + Sync {
    /// A client connection was accepted.
    fn client_connected(&self);
    /// A client connection ended.
    fn client_disconnected(&self);
    /// A stream entered its streaming phase.
    fn stream_opened(&self);
    /// A streaming phase concluded.
    fn stream_closed(&self);
    /// Payload bytes were written to a sink.
    fn add_bytes_received(&self, n: u64);
}

/// Metrics sink that discards everything. For tests and disabled setups.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn client_connected(&self) {}
    fn client_disconnected(&self) {}
    fn stream_opened(&self) {}
    fn stream_closed(&self) {}
    fn add_bytes_received(&self, _n: u64) {}
}

/// Lock-free counter set backing the `/metrics` endpoint.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    connects: AtomicU64,
    disconnects: AtomicU64,
    active_streams: AtomicI64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total accepted client connections.
    pub connects: u64,
    /// Total ended client connections.
    pub disconnects: u64,
    /// Streams currently in their streaming phase.
    pub active_streams: i64,
    /// Total payload bytes written to sinks.
    pub bytes_received: u64,
}

impl AtomicMetrics {
    /// Create a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            active_streams: self.active_streams.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for AtomicMetrics {
    fn client_connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    fn client_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn stream_opened(&self) {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
    }

    fn stream_closed(&self) {
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }
}

/// Render a snapshot in Prometheus text exposition format.
#[must_use]
pub fn render_prometheus(snap: &MetricsSnapshot) -> String {
    format!(
        "# HELP logship_client_connects_total Accepted client connections\n\
         # TYPE logship_client_connects_total counter\n\
         logship_client_connects_total {}\n\
         # HELP logship_client_disconnects_total Ended client connections\n\
         # TYPE logship_client_disconnects_total counter\n\
         logship_client_disconnects_total {}\n\
         # HELP logship_active_streams Streams currently transferring\n\
         # TYPE logship_active_streams gauge\n\
         logship_active_streams {}\n\
         # HELP logship_bytes_received_total Payload bytes written to sinks\n\
         # TYPE logship_bytes_received_total counter\n\
         logship_bytes_received_total {}\n",
        snap.connects, snap.disconnects, snap.active_streams, snap.bytes_received
    )
}

/// HTTP server exposing `GET /metrics`.
pub struct MetricsServer {
    listen: String,
    metrics: Arc<AtomicMetrics>,
    cancel: CancellationToken,
}

impl MetricsServer {
    /// Create a server for the given listen address.
    #[must_use]
    pub fn new(listen: String, metrics: Arc<AtomicMetrics>, cancel: CancellationToken) -> Self {
        Self {
            listen,
            metrics,
            cancel,
        }
    }

    /// Build the router with the single metrics route.
    pub fn build_router(&self) -> Router {
        let metrics = Arc::clone(&self.metrics);
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let metrics = Arc::clone(&metrics);
                    async move { render_prometheus(&metrics.snapshot()) }
                }),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(self) -> std::io::Result<()> {
        let app = self.build_router();
        let cancel = self.cancel.clone();

        tracing::info!(listen = %self.listen, "Starting metrics endpoint");
        let listener = TcpListener::bind(&self.listen).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("Metrics endpoint shutting down");
            })
            .await
    }
}
