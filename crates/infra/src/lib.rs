//! Infrastructure for the data warehouse export: configuration, durable
//! queues, the portal client, payload builders, export flows and the
//! remote job status watcher.

pub mod config;
pub mod export;
pub mod payload;
pub mod portal;
pub mod store;
pub mod watcher;

pub use config::{ConfigError, ProcessConfig};
pub use watcher::{PollSummary, StatusWatcher, WatcherError, WatcherHandle};
