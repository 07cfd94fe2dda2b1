//! Proxy Validator - Concurrent Proxy Checker
//!
//! Validates candidate proxy endpoints by performing a minimal protocol
//! handshake (SOCKS4, SOCKS5 or HTTP CONNECT) through each one to a fixed
//! target address, with bounded concurrency and cooperative cancellation.

pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
