use super::state::{DEFAULT_BUDGET_SECS, JobStatus, Phase, WaitStage, WaitState};
use crate::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Job-status collaborator polled while a wait is active.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn check_status(&self, token: &str) -> eyre::Result<JobStatus>;
}

#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub budget_secs: u32,
    pub tick: Duration,
    pub poll_interval: Duration,
    pub tour_base_url: String,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            budget_secs: DEFAULT_BUDGET_SECS,
            tick: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            tour_base_url: "https://travelone.io".to_string(),
        }
    }
}

impl WaitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            budget_secs: env_parse("WAIT_BUDGET_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.budget_secs),
            tick: env_parse("WAIT_TICK_MS")
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick),
            poll_interval: env_parse("WAIT_POLL_MS")
                .filter(|v| *v > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            tour_base_url: std::env::var("TOUR_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.tour_base_url),
        }
    }

    pub fn tour_url(&self, slug: &str) -> String {
        format!("{}/tour/{}", self.tour_base_url, urlencoding::encode(slug))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Read-only view of a controller, published on every state change.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitSnapshot {
    pub token: String,
    #[serde(flatten)]
    pub phase: Phase,
    pub remaining_seconds: u32,
    pub clock: String,
    pub progress: f64,
    pub stage: Option<WaitStage>,
    pub tour_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WaitSnapshot {
    fn capture(
        token: &str,
        state: &WaitState,
        config: &WaitConfig,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        let finished_at = state.phase().is_terminal().then(Utc::now);
        Self {
            token: token.to_string(),
            phase: state.phase().clone(),
            remaining_seconds: state.remaining(),
            clock: state.clock(),
            progress: state.progress(),
            stage: state.stage(),
            tour_url: state.result_slug().map(|slug| config.tour_url(slug)),
            started_at,
            finished_at,
        }
    }

    #[cfg(test)]
    pub fn result_slug(&self) -> Option<&str> {
        match &self.phase {
            Phase::Ready { slug } => Some(slug),
            _ => None,
        }
    }
}

/// Bounded wait for one external generation job.
///
/// [`WaitController::activate`] spawns a driver task that counts the budget
/// down every `tick` and checks the job status immediately and then every
/// `poll_interval`. Both stop together when the job is ready, when the
/// budget runs out, or on [`WaitController::teardown`] (also run on drop).
pub struct WaitController {
    token: String,
    cancel: CancellationToken,
    snapshot: watch::Receiver<WaitSnapshot>,
    driver: Option<JoinHandle<()>>,
}

impl WaitController {
    /// Starts waiting on `token`. A blank token leaves the controller idle:
    /// no task is spawned and no status check is made.
    pub fn activate(
        token: impl Into<String>,
        source: Arc<dyn StatusSource>,
        config: WaitConfig,
    ) -> Self {
        let token = token.into();
        let cancel = CancellationToken::new();

        if token.trim().is_empty() {
            debug!(target = "travelone.wait", "empty token; controller stays idle");
            let state = WaitState::idle(config.budget_secs);
            let (_tx, rx) = watch::channel(WaitSnapshot::capture(&token, &state, &config, None));
            return Self {
                token,
                cancel,
                snapshot: rx,
                driver: None,
            };
        }

        let started_at = Utc::now();
        let state = WaitState::waiting(config.budget_secs);
        let (tx, rx) = watch::channel(WaitSnapshot::capture(
            &token,
            &state,
            &config,
            Some(started_at),
        ));
        info!(
            target = "travelone.wait",
            token = %token,
            budget_secs = config.budget_secs,
            "waiting for tour generation"
        );

        let driver = Driver {
            token: token.clone(),
            state,
            config,
            source,
            cancel: cancel.clone(),
            updates: tx,
            started_at,
            attempts: 0,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            token,
            cancel,
            snapshot: rx,
            driver: Some(handle),
        }
    }

    pub fn snapshot(&self) -> WaitSnapshot {
        self.snapshot.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<WaitSnapshot> {
        self.snapshot.clone()
    }

    /// True while the driver is still counting down and polling.
    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.driver.is_some()
            && !self.cancel.is_cancelled()
            && self.snapshot.borrow().phase == Phase::Waiting
    }

    /// Resolves with the final snapshot once the wait reaches a terminal
    /// phase, or with the last published one if the wait never ran or was torn down.
    #[cfg(test)]
    pub async fn finished(&self) -> WaitSnapshot {
        let mut rx = self.snapshot.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.phase != Phase::Waiting || self.cancel.is_cancelled() {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Stops the countdown, the polling and any in-flight status check.
    /// Safe to call more than once.
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.driver.take() {
            handle.abort();
            debug!(target = "travelone.wait", token = %self.token, "wait controller torn down");
        }
    }
}

impl Drop for WaitController {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct PollOutcome {
    attempt: u32,
    result: eyre::Result<JobStatus>,
}

struct Driver {
    token: String,
    state: WaitState,
    config: WaitConfig,
    source: Arc<dyn StatusSource>,
    cancel: CancellationToken,
    updates: watch::Sender<WaitSnapshot>,
    started_at: DateTime<Utc>,
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        let (results_tx, mut results) = mpsc::unbounded_channel::<PollOutcome>();
        let start = Instant::now();
        let mut countdown = time::interval_at(start + self.config.tick, self.config.tick);
        let mut polling = time::interval_at(start, self.config.poll_interval);
        polling.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Order matters: teardown first, then answers already received,
            // then the countdown, so a ready answer beats the final tick.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(outcome) = results.recv() => {
                    if self.apply(outcome) {
                        break;
                    }
                }
                _ = countdown.tick() => {
                    if self.state.is_final_tick() && self.settle(&mut results).await {
                        break;
                    }
                    let timed_out = self.state.tick();
                    self.publish();
                    if timed_out {
                        self.finish();
                        break;
                    }
                }
                _ = polling.tick() => self.spawn_check(&results_tx),
            }
        }

        // Releases in-flight checks whatever the reason for stopping.
        self.cancel.cancel();
    }

    /// Gives checks that resolve in the same instant as the final tick a
    /// chance to land first. Returns `true` if one made the wait ready.
    async fn settle(&mut self, results: &mut UnboundedReceiver<PollOutcome>) -> bool {
        tokio::task::yield_now().await;
        while let Ok(outcome) = results.try_recv() {
            if self.apply(outcome) {
                return true;
            }
        }
        false
    }

    fn apply(&mut self, outcome: PollOutcome) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match outcome.result {
            Ok(status) => {
                metrics::status_check("ok");
                if self.state.apply_status(&status) {
                    info!(
                        target = "travelone.wait",
                        token = %self.token,
                        attempt = outcome.attempt,
                        slug = self.state.result_slug().unwrap_or_default(),
                        remaining_secs = self.state.remaining(),
                        "tour ready"
                    );
                    self.publish();
                    self.finish();
                    return true;
                }
                debug!(
                    target = "travelone.wait",
                    token = %self.token,
                    attempt = outcome.attempt,
                    "tour not ready yet"
                );
            }
            Err(err) => {
                metrics::status_check("error");
                warn!(
                    target = "travelone.wait",
                    token = %self.token,
                    attempt = outcome.attempt,
                    error = %err,
                    "status check failed; still waiting"
                );
            }
        }
        false
    }

    fn spawn_check(&mut self, results: &UnboundedSender<PollOutcome>) {
        self.attempts += 1;
        let attempt = self.attempts;
        let source = Arc::clone(&self.source);
        let token = self.token.clone();
        let cancel = self.cancel.clone();
        let results = results.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = source.check_status(&token) => {
                    let _ = results.send(PollOutcome { attempt, result });
                }
            }
        });
    }

    fn publish(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let snapshot =
            WaitSnapshot::capture(&self.token, &self.state, &self.config, Some(self.started_at));
        self.updates.send_replace(snapshot);
    }

    fn finish(&self) {
        if self.state.phase() == &Phase::TimedOut {
            info!(
                target = "travelone.wait",
                token = %self.token,
                attempts = self.attempts,
                "tour generation is taking longer than expected"
            );
        }
        let elapsed = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        metrics::wait_finished(self.state.phase().as_str(), elapsed);
    }
}
