//! Background task that keeps the snapshot cache fresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use queuewatch_adapters::{QueueSource, UpstreamError};

use crate::cache::SnapshotCache;

/// Shortest interval the poller will tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between poll starts (default: 15s).
    pub interval: Duration,
    /// Deadline for each upstream call, independent of the interval
    /// (default: 30s).
    pub call_deadline: Duration,
    /// How long polls may keep failing before a warning is logged, and how
    /// often it is repeated while they do (default: 60s).
    pub failure_report_after: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            call_deadline: Duration::from_secs(30),
            failure_report_after: Duration::from_secs(60),
        }
    }
}

/// Periodically fetches queues from a [`QueueSource`] and publishes the
/// outcome to a [`SnapshotCache`].
///
/// Upstream failures stop here: they are published to the cache and logged,
/// never returned to the scrape path.
#[derive(Debug)]
pub struct Poller {
    source: Arc<dyn QueueSource>,
    cache: Arc<SnapshotCache>,
    config: PollerConfig,
    failures: FailureLog,
}

impl Poller {
    pub fn new(
        source: Arc<dyn QueueSource>,
        cache: Arc<SnapshotCache>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            cache,
            failures: FailureLog::new(config.failure_report_after, Instant::now()),
            config,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run one poll cycle and publish its outcome.
    ///
    /// Returns the number of queues fetched, or the error that was
    /// published in their place.
    pub async fn poll_once(&mut self) -> Result<usize, UpstreamError> {
        let started = Instant::now();
        let outcome = self.source.fetch_queues(self.config.call_deadline).await;
        let summary = outcome.as_ref().map(Vec::len).map_err(Clone::clone);

        match &summary {
            Ok(count) => {
                if self.failures.record_success(Instant::now()) {
                    tracing::info!(source = self.source.description(), "upstream recovered");
                }
                tracing::debug!(
                    queues = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "poll succeeded"
                );
            }
            Err(err) => {
                let now = Instant::now();
                if let Some(since_success) = self.failures.record_failure(now) {
                    tracing::warn!(
                        source = self.source.description(),
                        error = %err,
                        secs_since_success = since_success.as_secs(),
                        "polls have been failing"
                    );
                } else {
                    tracing::debug!(error = %err, "poll failed");
                }
            }
        }

        self.cache.publish(outcome);
        summary
    }

    /// Start polling in a background task.
    ///
    /// The first poll runs immediately, then one per interval. A slow poll
    /// delays the next tick rather than causing a burst of catch-up polls.
    pub fn start(mut self) -> PollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.config.interval.max(MIN_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                source = self.source.description(),
                interval_ms = interval.as_millis() as u64,
                "poller started"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        // A dropped handle counts as a stop request
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let _ = self.poll_once().await;
                    }
                }
            }

            tracing::info!("poller stopped");
        });

        PollerHandle { stop_tx, task }
    }
}

/// Handle to a running [`Poller`].
///
/// Dropping the handle also stops the poller, but without waiting for it.
#[derive(Debug)]
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling and wait for the loop to exit.
    ///
    /// A poll already in flight runs to completion (bounded by its call
    /// deadline) and its outcome is published before this returns.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "poller task failed");
        }
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Tracks time since the last successful poll and rate-limits the warning
/// logged while polls keep failing.
#[derive(Debug)]
struct FailureLog {
    report_after: Duration,
    last_success: Instant,
    last_report: Option<Instant>,
}

impl FailureLog {
    fn new(report_after: Duration, now: Instant) -> Self {
        Self {
            report_after,
            last_success: now,
            last_report: None,
        }
    }

    /// Returns true if a failure had been reported since the last success.
    fn record_success(&mut self, now: Instant) -> bool {
        self.last_success = now;
        self.last_report.take().is_some()
    }

    /// Returns the time since the last success if a warning is due.
    fn record_failure(&mut self, now: Instant) -> Option<Duration> {
        let since_success = now.saturating_duration_since(self.last_success);
        if since_success <= self.report_after {
            return None;
        }

        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) >= self.report_after);
        if !due {
            return None;
        }

        self.last_report = Some(now);
        Some(since_success)
    }
}
