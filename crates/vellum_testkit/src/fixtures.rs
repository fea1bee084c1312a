//! Log fixtures with automatic cleanup.
//!
//! [`TestLog`] owns a log in a temporary directory and removes the
//! directory on drop. The fixture config uses small pages and segments
//! so tests cross page and segment boundaries with little data, and a
//! background interval long enough that only explicit flushes move the
//! durability watermark.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use vellum_wal::{LogManager, WalConfig};

/// Routes log output to the test harness, honoring `RUST_LOG`. Safe
/// to call from every test; only the first call installs a
/// subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Fixture configuration: 512 byte pages, 64 page segments, no
/// background flushing during the test.
#[must_use]
pub fn small_config() -> WalConfig {
    WalConfig::new()
        .page_size(512)
        .max_segment_size(512 * 64)
        .flush_interval(Duration::from_secs(3600))
}

/// A log in a temporary directory, removed on drop.
///
/// Dereferences to [`LogManager`], so tests call log methods on the
/// fixture directly.
pub struct TestLog {
    log: Option<Arc<LogManager>>,
    config: WalConfig,
    temp_dir: TempDir,
}

impl TestLog {
    /// Opens a log with [`small_config`].
    #[must_use]
    pub fn open() -> Self {
        Self::with_config(small_config())
    }

    /// Opens a log with the given configuration.
    #[must_use]
    pub fn with_config(config: WalConfig) -> Self {
        let temp_dir = TempDir::new().expect("failed to create a temp directory");
        let log =
            LogManager::open(temp_dir.path(), config.clone()).expect("failed to open the log");
        Self {
            log: Some(log),
            config,
            temp_dir,
        }
    }

    /// The log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A shared handle to the manager, for spawning producer threads.
    #[must_use]
    pub fn manager(&self) -> Arc<LogManager> {
        Arc::clone(self.log.as_ref().expect("log is open"))
    }

    /// Closes the log and opens it again from the same directory, the
    /// way a clean process restart would.
    pub fn reopen(&mut self) {
        self.reopen_after(|_| {});
    }

    /// Closes the log, hands the directory to `damage` for file
    /// surgery, then opens it again: a crash followed by a restart.
    pub fn reopen_after<F>(&mut self, damage: F)
    where
        F: FnOnce(&Path),
    {
        if let Some(log) = self.log.take() {
            log.close().expect("failed to close the log");
        }
        damage(self.temp_dir.path());
        self.log = Some(
            LogManager::open(self.temp_dir.path(), self.config.clone())
                .expect("failed to reopen the log"),
        );
    }
}

impl Deref for TestLog {
    type Target = LogManager;

    fn deref(&self) -> &Self::Target {
        self.log.as_ref().expect("log is open")
    }
}

impl std::fmt::Debug for TestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLog")
            .field("path", &self.temp_dir.path())
            .finish_non_exhaustive()
    }
}

/// Runs a test body against a fresh log and cleans up afterwards.
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&LogManager) -> R,
{
    let fixture = TestLog::open();
    f(&fixture)
}
