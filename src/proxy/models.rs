//! Core data models for the validation run

use crate::Result;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default timeout for a single handshake in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 5000;

/// Default number of fetch retries per source URL
const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default delay between fetch retries in seconds
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Socks4,
    Socks5,
    Http,
}

impl ProtocolKind {
    /// Parse a protocol identifier string.
    ///
    /// Unknown identifiers yield `None` so that an unrecognized protocol can
    /// never produce a working verdict (fail-closed).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "socks4" => Some(ProtocolKind::Socks4),
            "socks5" => Some(ProtocolKind::Socks5),
            "http" => Some(ProtocolKind::Http),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Socks4 => "socks4",
            ProtocolKind::Socks5 => "socks5",
            ProtocolKind::Http => "http",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed address every proxy is asked to connect to.
///
/// The target must be an IPv4 dotted-quad literal plus port; hostnames are
/// not resolved because the SOCKS wire formats carry the raw 4 address bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    authority: String,
    ip: Ipv4Addr,
    port: u16,
}

impl Target {
    /// Parse an `ip:port` string. Failure here is fatal to the whole run.
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("target must be in ip:port format, got {:?}", s))?;
        let ip: Ipv4Addr = host
            .parse()
            .with_context(|| format!("target host {:?} is not an IPv4 literal", host))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("target port {:?} is not a valid port", port))?;
        Ok(Self {
            authority: format!("{}:{}", ip, port),
            ip,
            port,
        })
    }

    /// Raw target IPv4 bytes for the SOCKS wire formats
    pub fn ip_octets(&self) -> [u8; 4] {
        self.ip.octets()
    }

    /// Target port in big-endian byte order
    pub fn port_be(&self) -> [u8; 2] {
        self.port.to_be_bytes()
    }

    /// The literal `ip:port` string, used by HTTP CONNECT
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority)
    }
}

/// Configuration for the validation run
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout applied to each connect + handshake
    pub timeout: Duration,
    /// Maximum number of in-flight checks per batch
    pub concurrency: usize,
    /// Retries per source URL in the fetch stage
    pub max_retries: u32,
    /// Delay between fetch retries
    pub retry_delay: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// One-shot cooperative cancellation handle shared across a whole run.
///
/// The flag only ever transitions false -> true; there is no reset. Clones
/// share the same underlying state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent; wakes every pending `cancelled()`.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been signalled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before the re-check so a cancel() racing with this call
        // cannot be missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
