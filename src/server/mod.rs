//! Collector: accepts sender connections and materializes streams to disk.

pub mod registry;
pub mod session;
pub mod sink;

pub use registry::{SessionInfo, SessionRegistry};
pub use session::Session;
pub use sink::OutputSink;

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::protocol::Wire;

/// Alphabet and length of server-assigned stream ids.
const ID_CHARS: &[u8] = b"abcdef0123456789";
const ID_LEN: usize = 6;

/// Stream-id source: one generator seeded at server start and reused, so
/// rapid connection churn does not produce correlated ids.
#[derive(Debug)]
pub struct StreamIdGenerator {
    rng: Mutex<StdRng>,
}

impl StreamIdGenerator {
    /// Create a generator seeded from the OS entropy source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Draw an id that does not collide with any live session.
    pub async fn next(&self, registry: &SessionRegistry) -> String {
        loop {
            let candidate = {
                let mut rng = self.rng.lock().await;
                (0..ID_LEN)
                    .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
                    .collect::<String>()
            };
            if !registry.contains(&candidate).await {
                return candidate;
            }
            tracing::debug!(id = %candidate, "Stream id collision, drawing again");
        }
    }
}

impl Default for StreamIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The collector server: TCP listener plus shared session state.
pub struct Server {
    listen_address: String,
    base_directory: PathBuf,
    registry: Arc<SessionRegistry>,
    metrics: Arc<dyn Metrics>,
    id_gen: StreamIdGenerator,
}

impl Server {
    /// Create a server for the given listen address and sink base directory.
    pub fn new(listen_address: String, base_directory: PathBuf, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            listen_address,
            base_directory,
            registry: Arc::new(SessionRegistry::new()),
            metrics,
            id_gen: StreamIdGenerator::new(),
        }
    }

    /// The live session registry, for diagnostics.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Bind the listener.
    ///
    /// Split from [`Self::serve`] so callers can learn the bound address
    /// before accepting (tests bind port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen_address).await?;
        tracing::info!(listen = %self.listen_address, "Collector listening");
        Ok(listener)
    }

    /// Accept connections until the cancellation token fires, spawning one
    /// session task per connection.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::info!("Collector shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            self.spawn_session(stream, &cancel).await;
                            tracing::debug!(peer = %addr, "Accepted connection");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Bind and serve in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn run(&self, cancel: CancellationToken) -> std::io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await;
        Ok(())
    }

    async fn spawn_session(&self, stream: TcpStream, cancel: &CancellationToken) {
        let stream_id = self.id_gen.next(&self.registry).await;
        let session = Session::new(
            Wire::new(stream),
            stream_id.clone(),
            self.base_directory.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            cancel.child_token(),
        );
        let metrics = Arc::clone(&self.metrics);
        metrics.client_connected();
        tokio::spawn(async move {
            session.run().await;
            metrics.client_disconnected();
        });
    }
}
