//! Run loop driving one validation batch per protocol
//!
//! Protocols are processed sequentially in sorted key order, so runs and
//! their logs are reproducible. Cancellation is observed at batch boundaries:
//! a batch that has started always runs to its join barrier, cancellation
//! only prevents the next one from starting.

use crate::proxy::checker::ProxyChecker;
use crate::proxy::fetcher::ProxyFetcher;
use crate::proxy::models::{CancelToken, ProtocolKind};
use crate::proxy::report::{LogLevel, Logger};
use crate::proxy::store::ProxyStore;
use crate::Result;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Per-protocol source URLs, keyed by protocol identifier string
pub type SourceMap = BTreeMap<String, Vec<String>>;

/// Working-proxy counts per protocol after a run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub per_protocol: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn total_working(&self) -> usize {
        self.per_protocol.values().sum()
    }
}

/// Load the protocol -> source URLs map from a JSON file.
///
/// An unreadable or unparsable file is fatal: without sources there is
/// nothing meaningful to check.
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<SourceMap> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sources file {}", path.display()))?;
    let sources: SourceMap = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse sources file {}", path.display()))?;
    Ok(sources)
}

/// Drives fetch, sanitize, check and save for every configured protocol
pub struct ProxyRunner {
    sources: SourceMap,
    fetcher: ProxyFetcher,
    checker: ProxyChecker,
    store: ProxyStore,
    logger: Arc<dyn Logger>,
    cancel: CancelToken,
}

impl ProxyRunner {
    pub fn new(
        sources: SourceMap,
        fetcher: ProxyFetcher,
        checker: ProxyChecker,
        store: ProxyStore,
        logger: Arc<dyn Logger>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sources,
            fetcher,
            checker,
            store,
            logger,
            cancel,
        }
    }

    /// Process every protocol batch sequentially, stopping at the next batch
    /// boundary once cancellation has been signalled.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for (key, urls) in &self.sources {
            if self.cancel.is_cancelled() {
                self.logger
                    .log(LogLevel::Info, "Cancellation requested, stopping run");
                break;
            }
            self.logger.log(LogLevel::Info, &"=".repeat(40));
            self.logger.log(
                LogLevel::Info,
                &format!("Processing {} proxies", key.to_uppercase()),
            );
            self.logger.log(LogLevel::Info, &"=".repeat(40));

            let working = self.process_protocol(key, urls).await;
            summary.per_protocol.insert(key.clone(), working);
        }
        summary
    }

    /// Fetch, sanitize, checkpoint, check and persist one protocol batch,
    /// returning the number of confirmed-working proxies.
    async fn process_protocol(&self, key: &str, urls: &[String]) -> usize {
        let Some(kind) = ProtocolKind::parse(key) else {
            // fail-closed: an unknown protocol never yields working proxies
            self.logger.log(
                LogLevel::Error,
                &format!("Unknown protocol {:?} in sources, skipping", key),
            );
            return 0;
        };

        let raw = self.fetcher.fetch_all(urls).await;
        let sanitized = ProxyFetcher::sanitize(&raw);
        let Some(pending_path) = self.store.save_pending(kind, &sanitized) else {
            return 0;
        };

        let candidates = self.store.load_pending(&pending_path);
        if candidates.is_empty() {
            return 0;
        }

        let working = self.checker.check_batch(kind, candidates).await;
        self.store.save_working(kind, &working);
        working.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{CheckerConfig, Target};
    use crate::proxy::report::recorders::{RecordingLogger, RecordingProgress};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` over raw HTTP to every connection.
    async fn spawn_list_server(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/list.txt", addr)
    }

    /// SOCKS4 proxy stand-in granting every request.
    async fn spawn_socks4_responder() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(&[0x00, 0x5A]).await;
                    let _ = stream.read(&mut buf).await;
                });
            }
        });
        addr.to_string()
    }

    fn build_runner(
        sources: SourceMap,
        dir: &Path,
        cancel: CancelToken,
    ) -> (ProxyRunner, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(2))
            .with_concurrency(8);
        let fetcher = ProxyFetcher::new(&config, cancel.clone(), logger.clone()).unwrap();
        let checker = ProxyChecker::new(
            config,
            Target::parse("1.1.1.1:80").unwrap(),
            cancel.clone(),
        )
        .with_progress_sink(Arc::new(RecordingProgress::default()));
        let store = ProxyStore::new(
            dir.join("temp_proxies"),
            dir.join("proxies"),
            logger.clone(),
        );
        let runner = ProxyRunner::new(sources, fetcher, checker, store, logger.clone(), cancel);
        (runner, logger)
    }

    #[test]
    fn test_load_sources() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            r#"{"socks4": ["http://a/list"], "http": ["http://b/list", "http://c/list"]}"#,
        )
        .unwrap();

        let sources = load_sources(&path).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources["http"].len(), 2);
    }

    #[test]
    fn test_load_sources_failures_are_fatal() {
        let dir = tempdir().unwrap();
        assert!(load_sources(dir.path().join("missing.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_sources(&path).is_err());
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let proxy_addr = spawn_socks4_responder().await;
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            addr.to_string()
        };
        let list_url =
            spawn_list_server(format!("{}\n{}\n{}\n", proxy_addr, dead_addr, proxy_addr)).await;

        let dir = tempdir().unwrap();
        let mut sources = SourceMap::new();
        sources.insert("socks4".to_string(), vec![list_url]);
        let (runner, logger) = build_runner(sources, dir.path(), CancelToken::new());

        let summary = runner.run().await;
        assert_eq!(summary.per_protocol["socks4"], 1);
        assert_eq!(summary.total_working(), 1);

        // duplicate list entries were collapsed before checking
        let pending =
            std::fs::read_to_string(dir.path().join("temp_proxies").join("socks4.txt")).unwrap();
        assert_eq!(pending.lines().count(), 2);

        let saved =
            std::fs::read_to_string(dir.path().join("proxies").join("SOCKS4.txt")).unwrap();
        assert_eq!(saved.trim(), proxy_addr);

        let lines = logger.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(_, msg)| msg.contains("Processing SOCKS4 proxies")));
    }

    #[tokio::test]
    async fn test_run_skips_unknown_protocol() {
        let dir = tempdir().unwrap();
        let mut sources = SourceMap::new();
        sources.insert("gopher".to_string(), vec!["http://127.0.0.1:1/x".into()]);
        let (runner, logger) = build_runner(sources, dir.path(), CancelToken::new());

        let summary = runner.run().await;
        assert_eq!(summary.per_protocol["gopher"], 0);

        let lines = logger.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(level, msg)| *level == LogLevel::Error && msg.contains("Unknown protocol")));
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_batch() {
        let dir = tempdir().unwrap();
        let mut sources = SourceMap::new();
        sources.insert("socks5".to_string(), vec!["http://127.0.0.1:1/x".into()]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let (runner, _) = build_runner(sources, dir.path(), cancel);

        let summary = runner.run().await;
        assert!(summary.per_protocol.is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_yields_zero_working() {
        let list_url = spawn_list_server(String::new()).await;
        let dir = tempdir().unwrap();
        let mut sources = SourceMap::new();
        sources.insert("http".to_string(), vec![list_url]);
        let (runner, _) = build_runner(sources, dir.path(), CancelToken::new());

        let summary = runner.run().await;
        assert_eq!(summary.per_protocol["http"], 0);
    }
}
