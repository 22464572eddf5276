use super::controller::{StatusSource, WaitConfig, WaitController, WaitSnapshot};
use super::state::Phase;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a job token is required to wait on an import")]
    EmptyToken,
}

/// Live wait controllers keyed by job token.
#[derive(Clone)]
pub struct WaitRegistry {
    source: Arc<dyn StatusSource>,
    config: WaitConfig,
    retention: Duration,
    controllers: Arc<Mutex<HashMap<String, WaitController>>>,
}

impl WaitRegistry {
    pub fn new(source: Arc<dyn StatusSource>, config: WaitConfig, retention: Duration) -> Self {
        Self {
            source,
            config,
            retention,
            controllers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts waiting on `token`, or returns the existing wait for it.
    /// A wait that already timed out is replaced by a fresh one.
    pub async fn start(&self, token: &str) -> Result<WaitSnapshot, RegistryError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RegistryError::EmptyToken);
        }
        let mut guard = self.controllers.lock().await;
        let existing = guard.get(token).map(WaitController::snapshot);
        if let Some(snapshot) = existing {
            if snapshot.phase != Phase::TimedOut {
                debug!(target = "travelone.wait", token = %token, "token already watched");
                return Ok(snapshot);
            }
            if let Some(mut expired) = guard.remove(token) {
                expired.teardown();
            }
            info!(target = "travelone.wait", token = %token, "re-watching timed out import");
        }
        let controller =
            WaitController::activate(token, Arc::clone(&self.source), self.config.clone());
        let snapshot = controller.snapshot();
        guard.insert(token.to_string(), controller);
        Ok(snapshot)
    }

    pub async fn snapshot(&self, token: &str) -> Option<WaitSnapshot> {
        let guard = self.controllers.lock().await;
        guard.get(token.trim()).map(WaitController::snapshot)
    }

    /// Tears the wait down and forgets it. Returns the last snapshot.
    pub async fn cancel(&self, token: &str) -> Option<WaitSnapshot> {
        let token = token.trim();
        let mut controller = self.controllers.lock().await.remove(token)?;
        controller.teardown();
        info!(target = "travelone.wait", token = %token, "wait cancelled by agent");
        Some(controller.snapshot())
    }

    pub async fn len(&self) -> usize {
        self.controllers.lock().await.len()
    }

    /// Forgets waits that finished longer ago than the retention window.
    pub async fn reap(&self) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let now = Utc::now();
        let mut guard = self.controllers.lock().await;
        let before = guard.len();
        guard.retain(|_, controller| {
            let snapshot = controller.snapshot();
            match snapshot.finished_at {
                Some(finished_at) => now - finished_at < retention,
                None => true,
            }
        });
        let reaped = before - guard.len();
        if reaped > 0 {
            debug!(target = "travelone.wait", reaped, "reaped finished waits");
        }
        reaped
    }

    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                registry.reap().await;
            }
        })
    }
}

pub fn retention_from_env() -> Duration {
    std::env::var("WAIT_RETENTION_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::state::JobStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicU32,
        finished: AtomicBool,
    }

    #[async_trait]
    impl StatusSource for CountingSource {
        async fn check_status(&self, token: &str) -> eyre::Result<JobStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == "done" || self.finished.load(Ordering::SeqCst) {
                Ok(JobStatus::Ready {
                    slug: "kyoto-spring".into(),
                })
            } else {
                Ok(JobStatus::Pending)
            }
        }
    }

    fn registry(source: Arc<CountingSource>, retention: Duration) -> WaitRegistry {
        WaitRegistry::new(source, WaitConfig::default(), retention)
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_empty_token() {
        let registry = registry(Arc::default(), Duration::from_secs(600));
        let err = registry.start("   ").await.expect_err("empty token");
        assert!(matches!(err, RegistryError::EmptyToken));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_token_is_watched_once() {
        let source = Arc::new(CountingSource::default());
        let registry = registry(source.clone(), Duration::from_secs(600));

        registry.start("abc123").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let again = registry.start(" abc123 ").await.unwrap();

        assert_eq!(again.remaining_seconds, 178);
        assert_eq!(registry.len().await, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_and_forgets_the_wait() {
        let source = Arc::new(CountingSource::default());
        let registry = registry(source.clone(), Duration::from_secs(600));

        registry.start("abc123").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        let last = registry.cancel("abc123").await.expect("watched");
        assert_eq!(last.phase, Phase::Waiting);
        assert_eq!(last.remaining_seconds, 175);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(registry.snapshot("abc123").await.is_none());
        assert!(registry.cancel("abc123").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reap_keeps_running_waits_and_drops_finished_ones() {
        let registry = registry(Arc::default(), Duration::ZERO);

        registry.start("done").await.unwrap();
        registry.start("pending").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let ready = registry.snapshot("done").await.unwrap();
        assert_eq!(ready.result_slug(), Some("kyoto-spring"));

        assert_eq!(registry.reap().await, 1);
        assert!(registry.snapshot("done").await.is_none());
        assert!(registry.snapshot("pending").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rewatch_after_timeout_checks_the_job_again() {
        let source = Arc::new(CountingSource::default());
        let registry = registry(source.clone(), Duration::from_secs(600));

        registry.start("abc123").await.unwrap();
        tokio::time::sleep(Duration::from_secs(181)).await;
        let expired = registry.snapshot("abc123").await.unwrap();
        assert_eq!(expired.phase, Phase::TimedOut);
        assert_eq!(source.calls.load(Ordering::SeqCst), 36);

        source.finished.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 36);

        let restarted = registry.start("abc123").await.unwrap();
        assert_eq!(restarted.phase, Phase::Waiting);
        assert_eq!(restarted.remaining_seconds, 180);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let ready = registry.snapshot("abc123").await.unwrap();
        assert_eq!(ready.result_slug(), Some("kyoto-spring"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 37);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_is_not_restarted() {
        let source = Arc::new(CountingSource::default());
        let registry = registry(source.clone(), Duration::from_secs(600));

        registry.start("done").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let again = registry.start("done").await.unwrap();

        assert_eq!(again.result_slug(), Some("kyoto-spring"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_trim_the_token_like_start() {
        let registry = registry(Arc::default(), Duration::from_secs(600));

        registry.start(" abc123 ").await.unwrap();
        assert!(registry.snapshot("abc123 ").await.is_some());
        assert!(registry.cancel("  abc123").await.is_some());
        assert_eq!(registry.len().await, 0);
    }
}
