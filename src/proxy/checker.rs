//! Proxy checker module for validating proxies with minimal handshakes
//!
//! Each check opens exactly one TCP connection to the candidate, performs the
//! smallest protocol exchange that yields a definitive accept/reject signal,
//! and closes the connection on every exit path. Network failures of any kind
//! are a `false` verdict, never an error.

use crate::proxy::models::{CancelToken, CheckerConfig, ProtocolKind, Target};
use crate::proxy::report::{ProgressBar, ProgressSink};
use futures::stream::{self, StreamExt};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

/// Interval between progress reporter polls
const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

/// SOCKS4 "request granted" reply code
const SOCKS4_GRANTED: u8 = 0x5A;

/// Proxy checker validating candidates against a fixed target
pub struct ProxyChecker {
    config: CheckerConfig,
    target: Target,
    cancel: CancelToken,
    progress: Arc<dyn ProgressSink>,
}

impl ProxyChecker {
    /// Create a checker reporting progress to the terminal bar
    pub fn new(config: CheckerConfig, target: Target, cancel: CancelToken) -> Self {
        Self {
            config,
            target,
            cancel,
            progress: Arc::new(ProgressBar),
        }
    }

    /// Replace the progress sink (used by the tests and embedding callers)
    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Check a single candidate with the checker for `kind`.
    ///
    /// Returns `false` for refused connections, DNS failures, short or
    /// unexpected replies, timeouts and observed cancellation. The whole
    /// connect + handshake is bounded by the configured timeout.
    pub async fn check(&self, kind: ProtocolKind, candidate: &str) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            verdict = tokio::time::timeout(self.config.timeout, self.attempt(kind, candidate)) => {
                matches!(verdict, Ok(Ok(true)))
            }
        }
    }

    async fn attempt(&self, kind: ProtocolKind, candidate: &str) -> io::Result<bool> {
        let mut stream = TcpStream::connect(candidate).await?;
        match kind {
            ProtocolKind::Socks4 => self.socks4_handshake(&mut stream).await,
            ProtocolKind::Socks5 => self.socks5_handshake(&mut stream).await,
            ProtocolKind::Http => self.http_connect_handshake(&mut stream).await,
        }
        // stream dropped here, closing the connection on every path
    }

    /// SOCKS4 CONNECT: 9-byte request, 2-byte reply, granted iff 0x5A
    async fn socks4_handshake(&self, stream: &mut TcpStream) -> io::Result<bool> {
        let [port_hi, port_lo] = self.target.port_be();
        let [ip0, ip1, ip2, ip3] = self.target.ip_octets();
        // version, CONNECT, target port, target IP, empty user-id terminator
        stream
            .write_all(&[0x04, 0x01, port_hi, port_lo, ip0, ip1, ip2, ip3, 0x00])
            .await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        Ok(reply[1] == SOCKS4_GRANTED)
    }

    /// SOCKS5 no-auth greeting then CONNECT, succeeded iff reply code 0x00
    async fn socks5_handshake(&self, stream: &mut TcpStream) -> io::Result<bool> {
        // version 5, one method, "no auth"
        stream.write_all(&[0x05, 0x01, 0x00]).await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[1] != 0x00 {
            // proxy demands an auth method we do not speak
            return Ok(false);
        }

        let [port_hi, port_lo] = self.target.port_be();
        let [ip0, ip1, ip2, ip3] = self.target.ip_octets();
        // CONNECT with IPv4 address type
        stream
            .write_all(&[0x05, 0x01, 0x00, 0x01, ip0, ip1, ip2, ip3, port_hi, port_lo])
            .await?;

        // reply code plus bound address/port; only the code matters
        let mut reply = [0u8; 10];
        stream.read_exact(&mut reply).await?;
        Ok(reply[1] == 0x00)
    }

    /// HTTP CONNECT tunnel request, accepted iff the status line is 200
    async fn http_connect_handshake(&self, stream: &mut TcpStream) -> io::Result<bool> {
        let authority = self.target.authority();
        let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority);
        stream.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        Ok(read > 0 && line.starts_with("HTTP/1.1 200"))
    }

    /// Check a whole batch of candidates concurrently.
    ///
    /// At most `config.concurrency` checks are in flight at any instant; the
    /// semaphore is the sole backpressure bound on open sockets. Returns the
    /// unordered working subset, and only after every submitted check has
    /// completed, cancellation included.
    pub async fn check_batch(&self, kind: ProtocolKind, candidates: Vec<String>) -> Vec<String> {
        let total = candidates.len();
        if total == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let processed = Arc::new(AtomicUsize::new(0));

        let reporter = tokio::spawn({
            let processed = Arc::clone(&processed);
            let progress = Arc::clone(&self.progress);
            async move {
                loop {
                    let done = processed.load(Ordering::SeqCst);
                    if done >= total {
                        break;
                    }
                    progress.progress(done, total);
                    tokio::time::sleep(PROGRESS_INTERVAL).await;
                }
            }
        });

        let working: Vec<String> = stream::iter(candidates)
            .map(|candidate| {
                let semaphore = Arc::clone(&semaphore);
                let processed = Arc::clone(&processed);
                async move {
                    // Acquire only fails if the semaphore is closed, which
                    // cannot happen while we hold the Arc.
                    let permit = semaphore
                        .acquire()
                        .await
                        .expect("semaphore closed unexpectedly");
                    let verdict = self.check(kind, &candidate).await;
                    drop(permit);
                    processed.fetch_add(1, Ordering::SeqCst);
                    verdict.then_some(candidate)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .filter_map(|candidate| async move { candidate })
            .collect()
            .await;

        reporter.abort();
        let _ = reporter.await;
        self.progress.progress(processed.load(Ordering::SeqCst), total);

        working
    }
}
