//! Fetching candidate lists from remote URLs
//!
//! Each source URL serves a newline-separated proxy list. Fetching is
//! retry-aware and cancellation-aware; a source that keeps failing just
//! contributes nothing to the batch. Raw lines are sanitized down to unique
//! `host:port` candidate strings before checking.

use crate::proxy::models::{CancelToken, CheckerConfig};
use crate::proxy::report::{LogLevel, Logger};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default user agent for list downloads
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Scheme prefixes stripped from raw list lines
const SCHEME_PREFIXES: [&str; 4] = ["http://", "https://", "socks4://", "socks5://"];

/// Regex pattern to match IP:PORT pairs embedded in arbitrary text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Downloads raw proxy lists from source URLs
pub struct ProxyFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
    cancel: CancelToken,
    logger: Arc<dyn Logger>,
}

impl ProxyFetcher {
    pub fn new(
        config: &CheckerConfig,
        cancel: CancelToken,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            cancel,
            logger,
        })
    }

    /// Fetch every source URL, returning the concatenated raw lines.
    ///
    /// Each URL gets `max_retries` additional attempts spaced `retry_delay`
    /// apart; a URL that never succeeds is logged and skipped. Cancellation
    /// observed between attempts aborts fetching with whatever was collected.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<String> {
        let mut lines = Vec::new();
        for url in urls {
            let mut fetched = false;
            for attempt in 0..=self.max_retries {
                if self.cancel.is_cancelled() {
                    self.logger.log(
                        LogLevel::Info,
                        "Cancellation detected while fetching proxy lists",
                    );
                    return lines;
                }
                if attempt > 0 {
                    tokio::time::sleep(self.retry_delay).await;
                }
                match self.fetch_one(url).await {
                    Ok(body) => {
                        lines.extend(body.lines().map(str::to_string));
                        fetched = true;
                        break;
                    }
                    Err(err) => {
                        self.logger.log(
                            LogLevel::Error,
                            &format!("Attempt {} to fetch {} failed: {}", attempt + 1, url, err),
                        );
                    }
                }
            }
            if !fetched {
                self.logger
                    .log(LogLevel::Error, &format!("Giving up on {}", url));
            }
        }
        lines
    }

    async fn fetch_one(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Reduce raw fetched lines to unique `host:port` candidates.
    ///
    /// Lines are trimmed, scheme prefixes are stripped and everything past
    /// the second colon-separated field (user:pass suffixes) is dropped.
    /// Lines that do not look like `host:port` fall back to regex extraction,
    /// which picks `ip:port` pairs out of HTML-ish content. First-seen order
    /// is kept. Candidates are not otherwise validated; an unparsable entry
    /// simply fails its connection attempt later.
    pub fn sanitize(lines: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut sanitized = Vec::new();

        let mut push = |candidate: String| {
            if seen.insert(candidate.clone()) {
                sanitized.push(candidate);
            }
        };

        for line in lines {
            let mut line = line.trim();
            for prefix in SCHEME_PREFIXES {
                line = line.strip_prefix(prefix).unwrap_or(line);
            }
            if line.is_empty() {
                continue;
            }

            let mut parts = line.splitn(3, ':');
            match (parts.next(), parts.next()) {
                (Some(host), Some(port))
                    if !host.is_empty()
                        && !host.contains(char::is_whitespace)
                        && !port.is_empty()
                        && port.bytes().all(|b| b.is_ascii_digit()) =>
                {
                    push(format!("{}:{}", host, port));
                }
                _ => {
                    for caps in IP_PORT_REGEX.captures_iter(line) {
                        push(format!("{}:{}", &caps[1], &caps[2]));
                    }
                }
            }
        }

        sanitized
    }
}
