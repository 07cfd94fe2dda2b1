use anyhow::{Context, Result};
use clap::Parser;
use proxy_validator::{
    load_sources, CancelToken, CheckerConfig, LogLevel, LogSink, Logger, ProxyChecker,
    ProxyFetcher, ProxyRunner, ProxyStore, Target,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A concurrent proxy validator for SOCKS4, SOCKS5 and HTTP CONNECT endpoints
#[derive(Parser)]
#[command(name = "proxy-validator")]
#[command(about = "Validates proxy lists with a bounded concurrent handshake pool")]
struct Cli {
    /// JSON file mapping protocol names to proxy list URLs
    #[arg(short, long, default_value = "urls.json")]
    urls: PathBuf,

    /// Target ip:port every proxy is asked to connect to
    #[arg(short, long, default_value = "1.1.1.1:80")]
    target: String,

    /// Maximum number of concurrent proxy checks
    #[arg(long, default_value = "5000")]
    max_checks: usize,

    /// Per-check timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Retries per source URL when fetching lists
    #[arg(long, default_value = "0")]
    max_retries: u32,

    /// Delay between fetch retries in seconds
    #[arg(long, default_value = "1")]
    retry_delay: u64,

    /// Directory for sanitized pending lists
    #[arg(long, default_value = "temp_proxies")]
    temp_dir: String,

    /// Directory for confirmed working lists
    #[arg(long, default_value = "proxies")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let target = Target::parse(&cli.target)
        .with_context(|| format!("invalid --target {:?}", cli.target))?;
    let sources = load_sources(&cli.urls)?;

    let config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_concurrency(cli.max_checks)
        .with_max_retries(cli.max_retries)
        .with_retry_delay(Duration::from_secs(cli.retry_delay));

    let cancel = CancelToken::new();
    let logger: Arc<dyn Logger> = Arc::new(LogSink);

    {
        let cancel = cancel.clone();
        let logger = Arc::clone(&logger);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                logger.log(LogLevel::Info, "Cancellation requested");
                cancel.cancel();
            }
        });
    }

    let fetcher = ProxyFetcher::new(&config, cancel.clone(), Arc::clone(&logger))?;
    let checker = ProxyChecker::new(config, target, cancel.clone());
    let store = ProxyStore::new(cli.temp_dir, cli.output_dir, Arc::clone(&logger));
    let runner = ProxyRunner::new(sources, fetcher, checker, store, Arc::clone(&logger), cancel);

    logger.log(
        LogLevel::Info,
        "Starting proxy checking, press Ctrl+C to cancel",
    );
    let summary = runner.run().await;
    for (protocol, count) in &summary.per_protocol {
        logger.log(
            LogLevel::Info,
            &format!("{}: {} working proxies", protocol, count),
        );
    }
    logger.log(
        LogLevel::Info,
        &format!("Done, {} working proxies total", summary.total_working()),
    );

    Ok(())
}
