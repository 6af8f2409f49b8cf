//! Sender: tails local files and ships appended bytes to the collector.
//!
//! # Architecture
//!
//! ```text
//! notify events --> StreamManager --> Tailer (one per file)
//!                                       |
//!                                       v
//!                                  ClientStream --- TCP ---> collector
//! ```
//!
//! Each tailer exclusively owns its input file handle and its connection;
//! the manager only signals tailers over channels.

pub mod manager;
pub mod stream;
pub mod tailer;
pub mod watch;

pub use manager::StreamManager;
pub use stream::{ClientStream, StreamState};
pub use tailer::{Tailer, TailerSignal};
pub use watch::{FileEvent, FileWatcher, WatchError};

use std::path::PathBuf;

use crate::protocol::WireError;

/// Errors surfaced by the sender side.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Protocol or transport failure on the collector connection.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The input file could not be opened or read.
    #[error("Input file error for {path}: {source}")]
    Input {
        /// The file being tailed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
