//! Proxy module for fetching and validating proxies
//!
//! This module provides functionality for:
//! - Fetching proxy lists from remote URLs with retries
//! - Sanitizing raw lists down to unique host:port candidates
//! - Checking candidates with a bounded concurrent handshake pool
//! - Saving pending and confirmed-working proxies to files

pub mod checker;
pub mod fetcher;
pub mod models;
pub mod report;
pub mod runner;
pub mod store;

pub use checker::ProxyChecker;
pub use fetcher::ProxyFetcher;
pub use models::{CancelToken, CheckerConfig, ProtocolKind, Target};
pub use report::{LogLevel, LogSink, Logger, ProgressBar, ProgressSink};
pub use runner::{load_sources, ProxyRunner, RunSummary, SourceMap};
pub use store::ProxyStore;
