//! The shared snapshot cache between the background poller and scrapes.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::time::Instant;

use queuewatch_adapters::UpstreamError;
use queuewatch_types::QueueRecord;

/// The most recent view of all queues, plus the outcome of the last poll.
///
/// Cloning is cheap: the queue list is shared.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Queues from the last successful poll, in broker order.
    pub queues: Arc<[QueueRecord]>,
    /// When the queues were captured (monotonic), `None` before the first
    /// successful poll.
    pub captured_at: Option<Instant>,
    /// Unix timestamp in milliseconds of the capture, 0 before the first
    /// successful poll.
    pub timestamp_ms: u64,
    /// True iff the most recent poll succeeded.
    pub valid: bool,
    /// Why the most recent poll failed, if it did.
    pub last_error: Option<UpstreamError>,
}

impl Snapshot {
    /// Number of cached queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether no queues are cached.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Time since the queues were captured.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.captured_at
            .map(|captured| now.saturating_duration_since(captured))
    }

    /// Whether the snapshot should not be trusted as current: the last poll
    /// failed, nothing was ever captured, or the capture is older than
    /// `max_age`.
    pub fn is_stale(&self, max_age: Duration, now: Instant) -> bool {
        !self.valid || self.age(now).map_or(true, |age| age > max_age)
    }
}

/// Single-writer, many-reader holder of the current [`Snapshot`].
///
/// Readers get a point-in-time copy and never wait on network I/O; the write
/// lock is only held for the field swap.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    inner: RwLock<Snapshot>,
}

impl SnapshotCache {
    /// Create an empty, invalid cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a consistent copy of the current snapshot.
    pub fn get(&self) -> Snapshot {
        self.inner.read().clone()
    }

    /// Publish the outcome of a poll.
    ///
    /// On success the queue list and timestamps are replaced and the error
    /// cleared. On failure only the validity flag and error change; the
    /// previous queues stay available.
    pub fn publish(&self, outcome: Result<Vec<QueueRecord>, UpstreamError>) {
        match outcome {
            Ok(queues) => {
                let queues: Arc<[QueueRecord]> = queues.into();
                let captured_at = Instant::now();
                let timestamp_ms = current_timestamp_ms();

                let mut snapshot = self.inner.write();
                snapshot.queues = queues;
                snapshot.captured_at = Some(captured_at);
                snapshot.timestamp_ms = timestamp_ms;
                snapshot.valid = true;
                snapshot.last_error = None;
            }
            Err(err) => {
                let mut snapshot = self.inner.write();
                snapshot.valid = false;
                snapshot.last_error = Some(err);
            }
        }
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues(names: &[&str]) -> Vec<QueueRecord> {
        names.iter().map(|n| QueueRecord::new(*n, "/")).collect()
    }

    #[test]
    fn test_starts_empty_and_invalid() {
        let snapshot = SnapshotCache::new().get();
        assert!(snapshot.is_empty());
        assert!(!snapshot.valid);
        assert!(snapshot.captured_at.is_none());
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.timestamp_ms, 0);
    }

    #[test]
    fn test_publish_success() {
        let cache = SnapshotCache::new();
        cache.publish(Ok(queues(&["a", "b"])));

        let snapshot = cache.get();
        assert!(snapshot.valid);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.captured_at.is_some());
        assert!(snapshot.timestamp_ms > 0);
    }

    #[test]
    fn test_failed_publish_keeps_previous_queues() {
        let cache = SnapshotCache::new();
        cache.publish(Ok(queues(&["a", "b"])));
        let before = cache.get();

        cache.publish(Err(UpstreamError::Timeout));

        let after = cache.get();
        assert!(!after.valid);
        assert_eq!(after.last_error, Some(UpstreamError::Timeout));
        assert_eq!(&*after.queues, &*before.queues);
        assert_eq!(after.captured_at, before.captured_at);
        assert_eq!(after.timestamp_ms, before.timestamp_ms);
    }

    #[test]
    fn test_success_replaces_wholesale_and_clears_error() {
        let cache = SnapshotCache::new();
        cache.publish(Ok(queues(&["a", "b"])));
        cache.publish(Err(UpstreamError::CircuitOpen));
        cache.publish(Ok(queues(&["c"])));

        let snapshot = cache.get();
        assert!(snapshot.valid);
        assert!(snapshot.last_error.is_none());
        let names: Vec<&str> = snapshot.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let cache = SnapshotCache::new();
        let max_age = Duration::from_secs(30);
        assert!(cache.get().is_stale(max_age, Instant::now()));

        cache.publish(Ok(queues(&["a"])));
        assert!(!cache.get().is_stale(max_age, Instant::now()));

        tokio::time::advance(Duration::from_secs(31)).await;
        let snapshot = cache.get();
        assert_eq!(snapshot.age(Instant::now()), Some(Duration::from_secs(31)));
        assert!(snapshot.is_stale(max_age, Instant::now()));

        cache.publish(Ok(queues(&["a"])));
        cache.publish(Err(UpstreamError::Timeout));
        assert!(cache.get().is_stale(max_age, Instant::now()));
    }

    #[test]
    fn test_readers_never_see_partial_snapshots() {
        let cache = Arc::new(SnapshotCache::new());

        // Every snapshot of size n names all of its queues "n"; a torn read
        // would mix sizes and names.
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for round in 0..2_000 {
                    let n = round % 7 + 1;
                    let name = n.to_string();
                    cache.publish(Ok((0..n).map(|_| QueueRecord::new(&name, "/")).collect()));
                    if round % 3 == 0 {
                        cache.publish(Err(UpstreamError::Timeout));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = cache.get();
                        let expected = snapshot.len().to_string();
                        assert!(snapshot.queues.iter().all(|q| q.name == expected));
                        if snapshot.valid {
                            assert!(snapshot.last_error.is_none());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
