//! CompletionPoller: waits for the backend to list a freshly written archive.
//!
//! One task per archive. Each tick queries the backup list; a failed query is
//! logged and retried on the next tick. There is no attempt ceiling, so a
//! slug that never appears is polled until the check is cancelled or the
//! daemon shuts down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use hapro_client::{BackupCatalog, CompletionNotifier};
use hapro_core::BackupSlug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Poll `catalog` every `period` (first query one period from now) until it
/// lists `slug`. Returns the number of queries made.
pub async fn poll_until_listed(
    catalog: &dyn BackupCatalog,
    slug: &BackupSlug,
    period: Duration,
) -> u64 {
    let period = period.max(MIN_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u64;

    loop {
        ticker.tick().await;
        attempts += 1;
        match catalog.contains(slug).await {
            Ok(true) => return attempts,
            Ok(false) => debug!(slug = %slug, attempts, "backup not listed yet"),
            Err(err) => error!(slug = %slug, attempts, error = %err, "backup list query failed"),
        }
    }
}

struct TrackerInner {
    catalog: Arc<dyn BackupCatalog>,
    notifier: Arc<dyn CompletionNotifier>,
    period: Duration,
    extension: String,
    pending: Mutex<HashMap<String, AbortHandle>>,
}

impl TrackerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owner of the in-flight checks, keyed by archive file name. At most one
/// check runs per file name.
#[derive(Clone)]
pub struct CompletionTracker {
    inner: Arc<TrackerInner>,
}

impl CompletionTracker {
    pub fn new(
        catalog: Arc<dyn BackupCatalog>,
        notifier: Arc<dyn CompletionNotifier>,
        period: Duration,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                catalog,
                notifier,
                period,
                extension: extension.into(),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start polling for `file_name`. Returns `false` if a check for the same
    /// file is already running.
    pub fn track(&self, file_name: &str) -> bool {
        let mut pending = self.inner.pending();
        if pending.contains_key(file_name) {
            debug!(file = file_name, "completion check already running");
            return false;
        }

        let slug = BackupSlug::from_archive(file_name, &self.inner.extension);
        let inner = self.inner.clone();
        let file = file_name.to_string();
        info!(file = %file, slug = %slug, "tracking backup completion");

        let handle = tokio::spawn(async move {
            let attempts = poll_until_listed(inner.catalog.as_ref(), &slug, inner.period).await;
            info!(slug = %slug, attempts, "backend lists backup");
            inner.notifier.notify_backup_complete(&slug).await;
            inner.pending().remove(&file);
        });
        pending.insert(file_name.to_string(), handle.abort_handle());
        true
    }

    /// Stop the check for `file_name`. Returns `false` if none was running.
    pub fn cancel(&self, file_name: &str) -> bool {
        match self.inner.pending().remove(file_name) {
            Some(handle) => {
                handle.abort();
                debug!(file = file_name, "completion check cancelled");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.inner.pending().drain() {
            handle.abort();
        }
    }

    /// File names with a check in flight, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut files: Vec<String> = self.inner.pending().keys().cloned().collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use hapro_client::{BackupEntry, ClientError};
    use tokio::sync::mpsc;

    /// Lists `slug` from the `listed_from`-th query on; fails on `fail_on`.
    struct FakeCatalog {
        slug: String,
        listed_from: u64,
        fail_on: Option<u64>,
        calls: AtomicU64,
    }

    impl FakeCatalog {
        fn new(slug: &str, listed_from: u64) -> Self {
            Self {
                slug: slug.to_string(),
                listed_from,
                fail_on: None,
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackupCatalog for FakeCatalog {
        async fn list_backups(&self) -> hapro_client::Result<Vec<BackupEntry>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err(ClientError::Decode {
                    url: "http://supervisor/backups".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            let mut backups = vec![BackupEntry {
                slug: "older".to_string(),
                name: None,
                date: None,
            }];
            if call >= self.listed_from {
                backups.push(BackupEntry {
                    slug: self.slug.clone(),
                    name: None,
                    date: None,
                });
            }
            Ok(backups)
        }
    }

    struct RecordingNotifier(mpsc::UnboundedSender<BackupSlug>);

    #[async_trait]
    impl CompletionNotifier for RecordingNotifier {
        async fn notify_backup_complete(&self, slug: &BackupSlug) {
            let _ = self.0.send(slug.clone());
        }
    }

    const PERIOD: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn stops_on_the_tick_that_first_sees_the_slug() {
        let catalog = FakeCatalog::new("a1b2c3d4", 3);
        let started = Instant::now();

        let attempts = poll_until_listed(&catalog, &BackupSlug::from("a1b2c3d4"), PERIOD).await;

        assert_eq!(attempts, 3);
        assert_eq!(catalog.calls(), 3);
        assert!(started.elapsed() >= PERIOD * 3);
        assert!(started.elapsed() < PERIOD * 4);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn first_query_waits_one_full_period() {
        let catalog = FakeCatalog::new("a1b2c3d4", 1);
        let started = Instant::now();

        assert_eq!(
            poll_until_listed(&catalog, &BackupSlug::from("a1b2c3d4"), PERIOD).await,
            1
        );
        assert!(started.elapsed() >= PERIOD);
        assert!(started.elapsed() < PERIOD * 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failed_query_is_retried_next_tick() {
        let catalog = FakeCatalog {
            fail_on: Some(1),
            ..FakeCatalog::new("a1b2c3d4", 1)
        };
        let attempts = poll_until_listed(&catalog, &BackupSlug::from("a1b2c3d4"), PERIOD).await;
        assert_eq!(attempts, 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn tracker_notifies_once_and_clears_pending() {
        let catalog = Arc::new(FakeCatalog::new("a1b2c3d4", 2));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = CompletionTracker::new(
            catalog.clone(),
            Arc::new(RecordingNotifier(tx)),
            PERIOD,
            ".tar",
        );

        assert!(tracker.track("a1b2c3d4.tar"));
        assert!(!tracker.track("a1b2c3d4.tar"), "one check per file");
        assert_eq!(tracker.pending(), vec!["a1b2c3d4.tar".to_string()]);

        assert_eq!(rx.recv().await, Some(BackupSlug::from("a1b2c3d4")));
        tokio::task::yield_now().await;
        assert!(tracker.pending().is_empty());

        tokio::time::advance(PERIOD * 5).await;
        assert_eq!(catalog.calls(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancelled_check_never_notifies() {
        let catalog = Arc::new(FakeCatalog::new("never", u64::MAX));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tracker = CompletionTracker::new(
            catalog.clone(),
            Arc::new(RecordingNotifier(tx)),
            PERIOD,
            ".tar",
        );

        tracker.track("never.tar");
        tokio::time::sleep(PERIOD * 3 + Duration::from_secs(1)).await;
        assert_eq!(catalog.calls(), 3);

        assert!(tracker.cancel("never.tar"));
        assert!(!tracker.cancel("never.tar"));
        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(catalog.calls(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancel_all_stops_every_check() {
        let catalog = Arc::new(FakeCatalog::new("never", u64::MAX));
        let (tx, _rx) = mpsc::unbounded_channel();
        let tracker =
            CompletionTracker::new(catalog, Arc::new(RecordingNotifier(tx)), PERIOD, ".tar");

        tracker.track("one.tar");
        tracker.track("two.tar");
        assert_eq!(tracker.pending().len(), 2);
        tracker.cancel_all();
        assert!(tracker.pending().is_empty());
    }
}
