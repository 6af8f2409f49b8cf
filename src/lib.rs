//! logship - ships appended log data to a central collector over TCP.

pub mod client;
pub mod config;
pub mod files;
pub mod metrics;
pub mod protocol;
pub mod server;
