//! Filesystem notifications for input files.
//!
//! Uses notify-debouncer-full and bridges its callback thread to a tokio
//! mpsc channel. Parent directories are watched so that deletion and
//! recreation of the input files themselves are observed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{self, RecursiveMode},
    DebounceEventResult,
};
use tokio::sync::mpsc;

/// Errors from the filesystem watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The underlying notify watcher failed.
    #[error("Filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Events emitted for registered input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// The file grew or changed in place.
    Modified(PathBuf),
    /// The file appeared, either fresh or recreated after rotation.
    Created(PathBuf),
    /// The file was removed.
    Removed(PathBuf),
}

/// Watches the registered input files and emits [`FileEvent`]s.
///
/// Dropping the watcher stops the bridge thread.
pub struct FileWatcher {
    watched: Vec<PathBuf>,
    #[allow(dead_code)]
    stop_tx: std_mpsc::Sender<()>,
    #[allow(dead_code)]
    bridge_handle: thread::JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching the given files.
    ///
    /// Returns the watcher and a receiver for its events. Events for paths
    /// outside the given set are filtered out.
    ///
    /// # Errors
    ///
    /// Returns an error if the notify watcher cannot be created or a parent
    /// directory cannot be watched.
    pub fn new(
        watched: Vec<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FileEvent>), WatchError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (notify_tx, notify_rx) = std_mpsc::channel();

        let mut debouncer = new_debouncer(Duration::from_millis(100), None, move |result| {
            let _ = notify_tx.send(result);
        })?;

        // Watch each distinct parent directory, not the files themselves, so
        // remove/recreate cycles stay visible.
        let mut parents = HashSet::new();
        for path in &watched {
            let parent = path
                .parent()
                .map_or_else(|| PathBuf::from("."), PathBuf::from);
            if parents.insert(parent.clone()) {
                debouncer.watch(&parent, RecursiveMode::NonRecursive)?;
                tracing::debug!(dir = %parent.display(), "Watching directory");
            }
        }

        let filter: HashSet<PathBuf> = watched.iter().cloned().collect();
        let bridge_handle = thread::spawn(move || {
            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
                    Err(std_mpsc::TryRecvError::Empty) => {}
                }

                match notify_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(result) => Self::handle_debounce_result(result, &filter, &event_tx),
                    Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            drop(debouncer);
        });

        Ok((
            Self {
                watched,
                stop_tx,
                bridge_handle,
            },
            event_rx,
        ))
    }

    fn handle_debounce_result(
        result: DebounceEventResult,
        filter: &HashSet<PathBuf>,
        event_tx: &mpsc::UnboundedSender<FileEvent>,
    ) {
        match result {
            Ok(events) => {
                for event in &events {
                    Self::handle_notify_event(event, filter, event_tx);
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!(error = %error, "Filesystem watch error");
                }
            }
        }
    }

    fn handle_notify_event(
        event: &notify_debouncer_full::DebouncedEvent,
        filter: &HashSet<PathBuf>,
        event_tx: &mpsc::UnboundedSender<FileEvent>,
    ) {
        use notify::EventKind;

        for path in &event.paths {
            if !filter.contains(path) {
                continue;
            }
            let mapped = match event.kind {
                EventKind::Create(_) => FileEvent::Created(path.clone()),
                EventKind::Modify(_) => FileEvent::Modified(path.clone()),
                EventKind::Remove(_) => FileEvent::Removed(path.clone()),
                _ => continue,
            };
            let _ = event_tx.send(mapped);
        }
    }

    /// The files being watched.
    #[must_use]
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}
