//! File persistence for pending and confirmed-working proxy lists
//!
//! The sanitized batch is checkpointed to disk before checking and read back,
//! so an interrupted run leaves the fetched lists behind. Persistence
//! failures degrade (empty batch, skipped save) instead of aborting the run;
//! only the sources configuration file is treated as fatal elsewhere.

use crate::proxy::models::ProtocolKind;
use crate::proxy::report::{LogLevel, Logger};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stores per-protocol proxy lists under a temp and an output directory
pub struct ProxyStore {
    temp_dir: PathBuf,
    output_dir: PathBuf,
    logger: Arc<dyn Logger>,
}

impl ProxyStore {
    pub fn new<P: Into<PathBuf>>(temp_dir: P, output_dir: P, logger: Arc<dyn Logger>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
            logger,
        }
    }

    /// Write the sanitized batch to `<temp_dir>/<kind>.txt`.
    ///
    /// Returns the written path, or `None` after a logged I/O failure.
    pub fn save_pending(&self, kind: ProtocolKind, candidates: &[String]) -> Option<PathBuf> {
        let path = self.temp_dir.join(format!("{}.txt", kind));
        match self.write_list(&path, candidates) {
            Ok(()) => {
                self.logger.log(
                    LogLevel::Info,
                    &format!("Saved sanitized {} proxies to {}", kind, path.display()),
                );
                Some(path)
            }
            Err(err) => {
                self.logger.log(
                    LogLevel::Error,
                    &format!(
                        "Failed to save {} proxies to {}: {}",
                        kind,
                        path.display(),
                        err
                    ),
                );
                None
            }
        }
    }

    /// Read a pending list back; a logged read failure yields an empty batch.
    pub fn load_pending(&self, path: &Path) -> Vec<String> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let proxies: Vec<String> = content
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                self.logger.log(
                    LogLevel::Info,
                    &format!("Loaded {} proxies from {}", proxies.len(), path.display()),
                );
                proxies
            }
            Err(err) => {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Failed to load proxies from {}: {}", path.display(), err),
                );
                Vec::new()
            }
        }
    }

    /// Write confirmed-working proxies to `<output_dir>/<KIND>.txt`.
    pub fn save_working(&self, kind: ProtocolKind, proxies: &[String]) {
        let path = self
            .output_dir
            .join(format!("{}.txt", kind.as_str().to_uppercase()));
        match self.write_list(&path, proxies) {
            Ok(()) => {
                self.logger.log(
                    LogLevel::Info,
                    &format!(
                        "Saved {} working {} proxies to {}",
                        proxies.len(),
                        kind,
                        path.display()
                    ),
                );
            }
            Err(err) => {
                self.logger.log(
                    LogLevel::Error,
                    &format!("Failed to save {} proxies: {}", kind, err),
                );
            }
        }
    }

    fn write_list(&self, path: &Path, entries: &[String]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::report::recorders::RecordingLogger;
    use tempfile::tempdir;

    fn test_store(dir: &Path) -> (ProxyStore, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        let store = ProxyStore::new(
            dir.join("temp_proxies"),
            dir.join("proxies"),
            logger.clone(),
        );
        (store, logger)
    }

    #[test]
    fn test_pending_roundtrip() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        let candidates = vec!["1.2.3.4:8080".to_string(), "5.6.7.8:1080".to_string()];
        let path = store
            .save_pending(ProtocolKind::Socks5, &candidates)
            .unwrap();
        assert!(path.ends_with("socks5.txt"));

        let loaded = store.load_pending(&path);
        assert_eq!(loaded, candidates);
    }

    #[test]
    fn test_load_missing_file_is_empty_batch() {
        let dir = tempdir().unwrap();
        let (store, logger) = test_store(dir.path());

        let loaded = store.load_pending(&dir.path().join("nope.txt"));
        assert!(loaded.is_empty());

        let lines = logger.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(level, _)| *level == LogLevel::Error));
    }

    #[test]
    fn test_save_working_uses_uppercase_name() {
        let dir = tempdir().unwrap();
        let (store, logger) = test_store(dir.path());

        let proxies = vec!["1.2.3.4:8080".to_string()];
        store.save_working(ProtocolKind::Http, &proxies);

        let path = dir.path().join("proxies").join("HTTP.txt");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1.2.3.4:8080");

        let lines = logger.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(_, msg)| msg.contains("Saved 1 working http proxies")));
    }

    #[test]
    fn test_save_working_empty_list() {
        let dir = tempdir().unwrap();
        let (store, _) = test_store(dir.path());

        store.save_working(ProtocolKind::Socks4, &[]);
        let content = fs::read_to_string(dir.path().join("proxies").join("SOCKS4.txt")).unwrap();
        assert!(content.is_empty());
    }
}
