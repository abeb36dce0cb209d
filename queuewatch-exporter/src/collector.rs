//! Scrape-time rendering of the cached snapshot into metric families.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use tokio::time::Instant;

use queuewatch_adapters::QueueSource;
use queuewatch_types::{Alert, QueueRecord, QueueState, Thresholds};

use crate::cache::{Snapshot, SnapshotCache};
use crate::metrics::{ExporterMetrics, ENDPOINT_LABEL};

/// Error label used when a snapshot is stale without a recorded error:
/// nothing has been fetched yet, or the last success is too old.
const STALE_ERROR_TYPE: &str = "stale";

/// Prometheus collector that renders queue metrics from the snapshot cache.
///
/// Scrapes never touch the network: every `collect` reads the cache, derives
/// the per-queue metrics and reads the circuit breaker's in-memory status.
/// Concurrent scrapes are serialised so one render never interleaves with
/// another's reset.
#[derive(Debug)]
pub struct QueueCollector {
    cache: Arc<SnapshotCache>,
    source: Arc<dyn QueueSource>,
    metrics: ExporterMetrics,
    thresholds: Thresholds,
    max_age: Duration,
    render_lock: Mutex<()>,
    reported_failures: AtomicU64,
}

impl QueueCollector {
    /// Snapshots older than twice `poll_interval` are reported as stale.
    pub fn new(
        cache: Arc<SnapshotCache>,
        source: Arc<dyn QueueSource>,
        thresholds: Thresholds,
        poll_interval: Duration,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            cache,
            source,
            metrics: ExporterMetrics::new()?,
            thresholds,
            max_age: poll_interval.saturating_mul(2),
            render_lock: Mutex::new(()),
            reported_failures: AtomicU64::new(0),
        })
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Replace all metric values with those derived from `snapshot`.
    ///
    /// Queue series from earlier renders are cleared first. A stale
    /// snapshot still renders its queues and bumps `scrape_errors_total`.
    pub fn render(&self, snapshot: &Snapshot, now: Instant) {
        let metrics = &self.metrics;

        metrics.reset_queue_families();
        for queue in snapshot.queues.iter() {
            self.render_queue(queue);
        }

        if snapshot.is_stale(self.max_age, now) {
            let error_type = snapshot
                .last_error
                .as_ref()
                .map_or(STALE_ERROR_TYPE, |err| err.kind());
            metrics
                .scrape_errors_total
                .with_label_values(&[error_type])
                .inc();
        }

        metrics.snapshot_valid.set(flag(snapshot.valid));
        if snapshot.captured_at.is_some() {
            metrics
                .snapshot_timestamp_seconds
                .set(snapshot.timestamp_ms as f64 / 1000.0);
        }

        self.render_circuit();
    }

    fn render_queue(&self, queue: &QueueRecord) {
        let metrics = &self.metrics;
        let name = queue.name.as_str();
        let vhost = queue.vhost.as_str();
        let labels = [name, vhost];
        let state = queue.state();

        metrics
            .queue_messages
            .with_label_values(&[name, vhost, state.as_str()])
            .set(queue.messages as f64);
        metrics
            .queue_messages_ready
            .with_label_values(&labels)
            .set(queue.messages_ready as f64);
        metrics
            .queue_messages_unacknowledged
            .with_label_values(&labels)
            .set(queue.messages_unacknowledged as f64);

        metrics
            .queue_message_publish_rate
            .with_label_values(&labels)
            .set(queue.publish_rate());
        metrics
            .queue_message_deliver_rate
            .with_label_values(&labels)
            .set(queue.deliver_rate());
        metrics
            .queue_message_ack_rate
            .with_label_values(&labels)
            .set(queue.ack_rate());
        metrics
            .queue_message_redeliver_rate
            .with_label_values(&labels)
            .set(queue.redeliver_rate());
        metrics
            .queue_redeliveries_total
            .with_label_values(&labels)
            .set(queue.total_redeliveries() as f64);

        metrics
            .queue_consumers
            .with_label_values(&labels)
            .set(queue.consumers as f64);
        metrics
            .queue_consumer_utilisation
            .with_label_values(&labels)
            .set(queue.consumer_utilisation);
        // No independent capacity figure is available from the broker
        metrics
            .queue_consumer_capacity
            .with_label_values(&labels)
            .set(queue.consumer_utilisation);

        for candidate in QueueState::ALL {
            metrics
                .queue_state
                .with_label_values(&[name, vhost, candidate.as_str()])
                .set(flag(candidate == state));
        }

        metrics
            .queue_is_dead_letter
            .with_label_values(&labels)
            .set(flag(queue.is_dead_letter()));
        metrics
            .queue_health_score
            .with_label_values(&labels)
            .set(queue.health_score(&self.thresholds));

        set_alerts(&metrics.queue_depth_alert, name, vhost, queue.depth_alerts(&self.thresholds));
        set_alerts(
            &metrics.queue_utilization_alert,
            name,
            vhost,
            queue.utilisation_alerts(&self.thresholds),
        );

        if let Some(idle_since) = queue.idle_since {
            metrics
                .queue_idle_since_timestamp_seconds
                .with_label_values(&labels)
                .set(idle_since.timestamp_millis() as f64 / 1000.0);
        }
    }

    fn render_circuit(&self) {
        let status = self.source.circuit_status();
        let metrics = &self.metrics;

        metrics
            .circuit_breaker_state
            .with_label_values(&[ENDPOINT_LABEL])
            .set(flag(status.open));
        metrics
            .circuit_breaker_consecutive_failures
            .with_label_values(&[ENDPOINT_LABEL])
            .set(f64::from(status.failure_count));

        // The breaker keeps a lifetime total; export only what is new
        let previous = self
            .reported_failures
            .swap(status.total_failures, Ordering::Relaxed);
        let counter = metrics
            .circuit_breaker_failures_total
            .with_label_values(&[ENDPOINT_LABEL]);
        counter.inc_by(status.total_failures.saturating_sub(previous));
    }
}

impl Collector for QueueCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics
            .collectors()
            .into_iter()
            .flat_map(|collector| collector.desc())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.render_lock.lock();
        let started = Instant::now();

        let snapshot = self.cache.get();
        self.render(&snapshot, started);
        self.metrics
            .scrape_duration_seconds
            .set(started.elapsed().as_secs_f64());

        tracing::trace!(queues = snapshot.len(), valid = snapshot.valid, "rendered scrape");

        self.metrics
            .collectors()
            .into_iter()
            .flat_map(|collector| collector.collect())
            .collect()
    }
}

fn set_alerts(family: &prometheus::GaugeVec, name: &str, vhost: &str, alerts: [Alert; 2]) {
    for alert in alerts {
        family
            .with_label_values(&[name, vhost, alert.severity.as_str()])
            .set(flag(alert.firing));
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{queue, ScriptedSource};
    use prometheus::Registry;
    use queuewatch_adapters::UpstreamError;
    use queuewatch_types::{MessageStats, RateDetails};

    const INTERVAL: Duration = Duration::from_secs(15);

    fn setup() -> (Arc<SnapshotCache>, Arc<ScriptedSource>, QueueCollector) {
        let cache = Arc::new(SnapshotCache::new());
        let source = Arc::new(ScriptedSource::new([]));
        let collector =
            QueueCollector::new(cache.clone(), source.clone(), Thresholds::default(), INTERVAL)
                .unwrap();
        (cache, source, collector)
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        let full = format!("rabbitmq_custom_{name}");
        families.iter().find(|f| f.get_name() == full)
    }

    fn series_count(families: &[MetricFamily], name: &str) -> usize {
        family(families, name).map_or(0, |f| f.get_metric().len())
    }

    fn value(families: &[MetricFamily], name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        family(families, name)?
            .get_metric()
            .iter()
            .find(|m| {
                labels.iter().all(|(k, v)| {
                    m.get_label()
                        .iter()
                        .any(|l| l.get_name() == *k && l.get_value() == *v)
                })
            })
            .map(|m| {
                if m.has_gauge() {
                    m.get_gauge().get_value()
                } else {
                    m.get_counter().get_value()
                }
            })
    }

    fn queue_names(families: &[MetricFamily]) -> Vec<String> {
        let mut names: Vec<String> = family(families, "queue_health_score")
            .map(|f| {
                f.get_metric()
                    .iter()
                    .flat_map(|m| m.get_label())
                    .filter(|l| l.get_name() == "queue_name")
                    .map(|l| l.get_value().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn test_registers_with_registry() {
        let (_, _, collector) = setup();
        let registry = Registry::new();
        registry.register(Box::new(collector)).unwrap();

        let families = registry.gather();
        // Queue families have no series yet and are left out
        assert!(family(&families, "queue_health_score").is_none());
        assert_eq!(value(&families, "snapshot_valid", &[]), Some(0.0));
    }

    #[test]
    fn test_each_queue_gets_full_set_of_series() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![queue("orders", 5), queue("payments", 0)]));

        let families = collector.collect();
        assert_eq!(queue_names(&families), ["orders", "payments"]);

        for name in [
            "queue_messages",
            "queue_messages_ready",
            "queue_messages_unacknowledged",
            "queue_message_publish_rate",
            "queue_message_deliver_rate",
            "queue_message_ack_rate",
            "queue_message_redeliver_rate",
            "queue_redeliveries_total",
            "queue_consumers",
            "queue_consumer_utilisation",
            "queue_consumer_capacity",
            "queue_is_dead_letter",
            "queue_health_score",
        ] {
            assert_eq!(series_count(&families, name), 2, "{name}");
        }
        // One series per state and per severity
        assert_eq!(series_count(&families, "queue_state"), 6);
        assert_eq!(series_count(&families, "queue_depth_alert"), 4);
        assert_eq!(series_count(&families, "queue_utilization_alert"), 4);
        // Only reported by the broker for some queues
        assert_eq!(series_count(&families, "queue_idle_since_timestamp_seconds"), 0);
    }

    #[test]
    fn test_derived_values() {
        let (cache, _, collector) = setup();
        let blocked = QueueRecord {
            messages: 15_000,
            messages_ready: 14_000,
            messages_unacknowledged: 1_000,
            consumers: 1,
            consumer_utilisation: 0.005,
            message_stats: Some(MessageStats {
                publish_details: Some(RateDetails { rate: 5.0 }),
                deliver_details: Some(RateDetails { rate: 0.0 }),
                redeliver: 42,
                redeliver_details: Some(RateDetails { rate: 6.0 }),
                ..Default::default()
            }),
            ..QueueRecord::new("orders.dlq", "prod")
        };
        cache.publish(Ok(vec![blocked]));

        let families = collector.collect();
        let q = [("queue_name", "orders.dlq"), ("vhost", "prod")];
        let with = |extra: (&'static str, &'static str)| [q[0], q[1], extra];

        assert_eq!(value(&families, "queue_messages", &with(("state", "blocked"))), Some(15_000.0));
        assert_eq!(value(&families, "queue_state", &with(("state", "blocked"))), Some(1.0));
        assert_eq!(value(&families, "queue_state", &with(("state", "idle"))), Some(0.0));
        assert_eq!(value(&families, "queue_state", &with(("state", "active"))), Some(0.0));
        assert_eq!(value(&families, "queue_is_dead_letter", &q), Some(1.0));
        assert_eq!(value(&families, "queue_health_score", &q), Some(0.0));
        assert_eq!(value(&families, "queue_message_publish_rate", &q), Some(5.0));
        assert_eq!(value(&families, "queue_message_deliver_rate", &q), Some(0.0));
        assert_eq!(value(&families, "queue_redeliveries_total", &q), Some(42.0));
        assert_eq!(value(&families, "queue_consumer_capacity", &q), Some(0.005));
        assert_eq!(value(&families, "queue_depth_alert", &with(("severity", "warning"))), Some(1.0));
        assert_eq!(value(&families, "queue_depth_alert", &with(("severity", "critical"))), Some(1.0));
        assert_eq!(
            value(&families, "queue_utilization_alert", &with(("severity", "critical"))),
            Some(1.0)
        );
    }

    #[test]
    fn test_cleared_alerts_are_reported_as_zero() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![QueueRecord {
            consumers: 3,
            consumer_utilisation: 0.9,
            ..queue("orders", 10)
        }]));

        let families = collector.collect();
        for family_name in ["queue_depth_alert", "queue_utilization_alert"] {
            for severity in ["warning", "critical"] {
                assert_eq!(
                    value(&families, family_name, &[("queue_name", "orders"), ("severity", severity)]),
                    Some(0.0),
                    "{family_name} {severity}"
                );
            }
        }
        assert_eq!(value(&families, "queue_health_score", &[("queue_name", "orders")]), Some(100.0));
    }

    #[test]
    fn test_vanished_queues_leave_no_series() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![queue("a", 1), queue("b", 1), queue("c", 1)]));
        assert_eq!(queue_names(&collector.collect()), ["a", "b", "c"]);

        cache.publish(Ok(vec![queue("d", 1)]));
        let families = collector.collect();
        assert_eq!(queue_names(&families), ["d"]);
        assert_eq!(series_count(&families, "queue_state"), 3);
        assert_eq!(series_count(&families, "queue_messages"), 1);
    }

    #[test]
    fn test_state_change_moves_messages_series() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![queue("orders", 0)]));
        collector.collect();

        cache.publish(Ok(vec![QueueRecord {
            consumers: 1,
            ..queue("orders", 3)
        }]));
        let families = collector.collect();
        assert_eq!(series_count(&families, "queue_messages"), 1);
        assert_eq!(
            value(&families, "queue_messages", &[("state", "active")]),
            Some(3.0)
        );
    }

    #[test]
    fn test_idle_since_exported_when_present() {
        let (cache, _, collector) = setup();
        let idle: QueueRecord = serde_json::from_str(
            r#"{"name":"old","vhost":"/","idle_since":"2024-01-15 10:30:00"}"#,
        )
        .unwrap();
        cache.publish(Ok(vec![idle, queue("busy", 1)]));

        let families = collector.collect();
        assert_eq!(series_count(&families, "queue_idle_since_timestamp_seconds"), 1);
        assert_eq!(
            value(&families, "queue_idle_since_timestamp_seconds", &[("queue_name", "old")]),
            Some(1_705_314_600.0)
        );
    }

    #[test]
    fn test_failed_poll_renders_cached_queues_and_counts_error() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![queue("orders", 7)]));

        let families = collector.collect();
        assert_eq!(value(&families, "snapshot_valid", &[]), Some(1.0));
        assert_eq!(series_count(&families, "scrape_errors_total"), 0);

        cache.publish(Err(UpstreamError::Timeout));
        let families = collector.collect();
        assert_eq!(queue_names(&families), ["orders"]);
        assert_eq!(value(&families, "snapshot_valid", &[]), Some(0.0));
        assert_eq!(value(&families, "scrape_errors_total", &[("error_type", "timeout")]), Some(1.0));

        let families = collector.collect();
        assert_eq!(value(&families, "scrape_errors_total", &[("error_type", "timeout")]), Some(2.0));
    }

    #[test]
    fn test_never_polled_counts_as_stale() {
        let (_, _, collector) = setup();
        let families = collector.collect();
        assert_eq!(value(&families, "scrape_errors_total", &[("error_type", "stale")]), Some(1.0));
        assert!(family(&families, "snapshot_timestamp_seconds")
            .is_some_and(|f| f.get_metric()[0].get_gauge().get_value() == 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_snapshot_counts_as_stale() {
        let (cache, _, collector) = setup();
        cache.publish(Ok(vec![queue("orders", 1)]));

        tokio::time::advance(Duration::from_secs(30)).await;
        let families = collector.collect();
        assert_eq!(series_count(&families, "scrape_errors_total"), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let families = collector.collect();
        assert_eq!(value(&families, "scrape_errors_total", &[("error_type", "stale")]), Some(1.0));
        assert_eq!(queue_names(&families), ["orders"]);
    }

    #[test]
    fn test_circuit_breaker_series() {
        let (_, source, collector) = setup();
        let endpoint = [("endpoint", "rabbitmq_api")];

        let families = collector.collect();
        assert_eq!(value(&families, "circuit_breaker_state", &endpoint), Some(0.0));
        assert_eq!(value(&families, "circuit_breaker_failures_total", &endpoint), Some(0.0));

        {
            let mut status = source.status.lock();
            status.open = true;
            status.failure_count = 5;
            status.total_failures = 7;
        }
        let families = collector.collect();
        assert_eq!(value(&families, "circuit_breaker_state", &endpoint), Some(1.0));
        assert_eq!(value(&families, "circuit_breaker_consecutive_failures", &endpoint), Some(5.0));
        assert_eq!(value(&families, "circuit_breaker_failures_total", &endpoint), Some(7.0));

        // Counter follows the breaker's total, not the number of scrapes
        collector.collect();
        source.status.lock().total_failures = 9;
        let families = collector.collect();
        assert_eq!(value(&families, "circuit_breaker_failures_total", &endpoint), Some(9.0));
    }

    #[test]
    fn test_concurrent_scrapes_see_complete_renders() {
        let (cache, _, collector) = setup();
        let collector = Arc::new(collector);
        let names: Vec<String> = (0..50).map(|i| format!("queue-{i:02}")).collect();
        cache.publish(Ok(names.iter().map(|n| queue(n, 1)).collect()));

        let scrapers: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .map(|_| queue_names(&collector.collect()).len())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for scraper in scrapers {
            assert!(scraper.join().unwrap().iter().all(|&n| n == 50));
        }
    }
}
