//! Wire protocol shared by sender and collector.
//!
//! # Protocol
//!
//! Control messages are newline-terminated ASCII lines; after a successful
//! `INIT` the connection carries raw file bytes with no further framing.
//!
//! ```text
//! Sender                          Collector
//!    |                                |
//!    |<------ HELLO banner ----------|
//!    |<------ STREAMID <id> ---------|
//!    |------- INIT STREAM h:p ------>|
//!    |<------ OK <id> <idx> ---------|
//!    |======= raw file bytes =======>|
//!    |------- EOF (half-close) ----->|
//!    |<------ OK <idx> <bytes> ------|
//! ```
//!
//! The raw phase has no explicit length or terminator: the collector infers
//! the end of a transfer from connection EOF. A sender that merely pauses is
//! indistinguishable from one that is done, which callers must keep in mind
//! when driving tests. `CLOSE <id>` tears down a session that has not yet
//! entered the raw phase; once raw, any command line would be payload.

pub mod error;
pub mod message;
pub mod wire;

pub use error::WireError;
pub use message::{ClientCommand, ServerReply};
pub use wire::Wire;

/// Buffer size for raw byte transfer, both directions.
pub const CHUNK_SIZE: usize = 4096;

/// Banner sent as the first line after accept.
pub const BANNER: &str = concat!("logship v", env!("CARGO_PKG_VERSION"));
