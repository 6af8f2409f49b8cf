//! Stream manager: one tailer per configured input, driven by filesystem
//! events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::stream::ClientStream;
use super::tailer::{Tailer, TailerSignal};
use super::watch::{FileEvent, FileWatcher, WatchError};
use super::ClientError;
use crate::config::Config;
use crate::files::{FileRegistry, InputFile};

struct TailerHandle {
    signals: mpsc::UnboundedSender<TailerSignal>,
    task: JoinHandle<Result<u64, ClientError>>,
}

/// Spawns and supervises the tailers for all configured inputs.
///
/// Tailers own their files and connections exclusively; the manager only
/// talks to them over signal channels. A tailer that has already finished
/// is respawned from offset 0 when its file shows activity again.
pub struct StreamManager {
    server: String,
    hostname: String,
    rewind_on_error: bool,
    registry: FileRegistry,
    cancel: CancellationToken,
    tailers: HashMap<PathBuf, TailerHandle>,
}

impl StreamManager {
    /// Create a manager for the given target and inputs.
    #[must_use]
    pub fn new(
        server: String,
        hostname: String,
        rewind_on_error: bool,
        registry: FileRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server,
            hostname,
            rewind_on_error,
            registry,
            cancel,
            tailers: HashMap::new(),
        }
    }

    /// Create a manager from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config, cancel: CancellationToken) -> Self {
        Self::new(
            config.target.server.clone(),
            config.target.announced_hostname(),
            config.compat.rewind_on_error,
            config.file_registry(),
            cancel,
        )
    }

    /// Number of tailers currently spawned.
    #[must_use]
    pub fn active_tailers(&self) -> usize {
        self.tailers.len()
    }

    /// Spawn all tailers, then route filesystem events to them until
    /// cancelled. Waits for every tailer to finish before returning.
    ///
    /// # Errors
    ///
    /// Returns an error when watched inputs are configured but the
    /// filesystem watcher cannot be started.
    pub async fn run(mut self) -> Result<(), WatchError> {
        for input in self.registry.inputs().to_vec() {
            self.spawn_tailer(&input);
        }
        tracing::info!(
            server = %self.server,
            hostname = %self.hostname,
            tailers = self.tailers.len(),
            "Stream manager started"
        );

        let watch_paths: Vec<PathBuf> = self
            .registry
            .inputs()
            .iter()
            .filter(|f| f.watch)
            .map(|f| f.path.clone())
            .collect();
        let mut watcher_rx = None;
        let _watcher = if watch_paths.is_empty() {
            None
        } else {
            let (watcher, rx) = FileWatcher::new(watch_paths)?;
            watcher_rx = Some(rx);
            Some(watcher)
        };

        loop {
            let event = match watcher_rx.as_mut() {
                Some(rx) => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    event = rx.recv() => event,
                },
                None => {
                    self.cancel.cancelled().await;
                    break;
                }
            };
            match event {
                Some(event) => self.handle_event(event),
                None => {
                    tracing::warn!("Filesystem watcher stopped, tailers continue polling");
                    watcher_rx = None;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_event(&mut self, event: FileEvent) {
        match event {
            FileEvent::Modified(path) => self.signal(&path, TailerSignal::Wake),
            FileEvent::Created(path) => self.signal(&path, TailerSignal::Restart),
            FileEvent::Removed(path) => {
                // A later create event respawns the tailer from offset 0.
                tracing::info!(path = %path.display(), "Input file removed, stopping tailer");
                if let Some(handle) = self.tailers.get(&path) {
                    let _ = handle.signals.send(TailerSignal::Stop);
                }
            }
        }
    }

    /// Deliver a signal to the tailer for `path`, respawning it from offset
    /// 0 when it has already finished.
    fn signal(&mut self, path: &Path, signal: TailerSignal) {
        if let Some(handle) = self.tailers.get(path) {
            if handle.signals.send(signal).is_ok() {
                return;
            }
            tracing::info!(path = %path.display(), "Tailer finished, respawning");
            self.tailers.remove(path);
        }
        let Some(input) = self.registry.find_by_path(path) else {
            tracing::debug!(path = %path.display(), "Event for unregistered path ignored");
            return;
        };
        let input = input.clone();
        self.spawn_tailer(&input);
    }

    fn spawn_tailer(&mut self, input: &InputFile) {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let stream = ClientStream::new(
            self.server.clone(),
            self.hostname.clone(),
            input.path.display().to_string(),
        );
        let tailer = Tailer::new(
            stream,
            input.path.clone(),
            0,
            self.rewind_on_error,
            signal_rx,
            self.cancel.child_token(),
        );
        tracing::info!(name = %input.name, path = %input.path.display(), "Spawning tailer");
        let task = tokio::spawn(tailer.run());
        self.tailers
            .insert(input.path.clone(), TailerHandle { signals, task });
    }

    async fn shutdown(&mut self) {
        for (path, handle) in self.tailers.drain() {
            match handle.task.await {
                Ok(Ok(bytes)) => {
                    tracing::info!(path = %path.display(), bytes, "Tailer stopped");
                }
                Ok(Err(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "Tailer ended with error");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Tailer task failed");
                }
            }
        }
    }
}
