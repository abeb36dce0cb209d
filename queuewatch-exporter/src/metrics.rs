//! Metric family definitions.
//!
//! Every family exported by queuewatch is declared here. Nothing is
//! registered globally: [`crate::QueueCollector`] owns an [`ExporterMetrics`]
//! and exposes its families through the prometheus `Collector` protocol.

use prometheus::core::Collector;
use prometheus::{Gauge, GaugeVec, IntCounterVec, Opts};

/// Prefix shared by all exported metric names.
pub const NAMESPACE: &str = "rabbitmq_custom";

/// Label value identifying the management API in circuit breaker metrics.
pub const ENDPOINT_LABEL: &str = "rabbitmq_api";

const QUEUE_LABELS: &[&str] = &["queue_name", "vhost"];
const QUEUE_STATE_LABELS: &[&str] = &["queue_name", "vhost", "state"];
const QUEUE_SEVERITY_LABELS: &[&str] = &["queue_name", "vhost", "severity"];

/// All metric families.
#[derive(Debug, Clone)]
pub struct ExporterMetrics {
    // Queue-scoped, cleared before every render
    pub queue_messages: GaugeVec,
    pub queue_messages_ready: GaugeVec,
    pub queue_messages_unacknowledged: GaugeVec,
    pub queue_message_publish_rate: GaugeVec,
    pub queue_message_deliver_rate: GaugeVec,
    pub queue_message_ack_rate: GaugeVec,
    pub queue_message_redeliver_rate: GaugeVec,
    pub queue_redeliveries_total: GaugeVec,
    pub queue_consumers: GaugeVec,
    pub queue_consumer_utilisation: GaugeVec,
    pub queue_consumer_capacity: GaugeVec,
    pub queue_state: GaugeVec,
    pub queue_is_dead_letter: GaugeVec,
    pub queue_health_score: GaugeVec,
    pub queue_depth_alert: GaugeVec,
    pub queue_utilization_alert: GaugeVec,
    pub queue_idle_since_timestamp_seconds: GaugeVec,

    // Exporter-scoped
    pub scrape_duration_seconds: Gauge,
    pub scrape_errors_total: IntCounterVec,
    pub snapshot_timestamp_seconds: Gauge,
    pub snapshot_valid: Gauge,
    pub circuit_breaker_state: GaugeVec,
    pub circuit_breaker_consecutive_failures: GaugeVec,
    pub circuit_breaker_failures_total: IntCounterVec,
}

impl ExporterMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            queue_messages: gauge_vec(
                "queue_messages",
                "Total number of messages in the queue",
                QUEUE_STATE_LABELS,
            )?,
            queue_messages_ready: gauge_vec(
                "queue_messages_ready",
                "Number of messages ready for delivery",
                QUEUE_LABELS,
            )?,
            queue_messages_unacknowledged: gauge_vec(
                "queue_messages_unacknowledged",
                "Number of messages delivered but not yet acknowledged",
                QUEUE_LABELS,
            )?,
            queue_message_publish_rate: gauge_vec(
                "queue_message_publish_rate",
                "Rate of messages published to the queue per second",
                QUEUE_LABELS,
            )?,
            queue_message_deliver_rate: gauge_vec(
                "queue_message_deliver_rate",
                "Rate of messages delivered to consumers per second",
                QUEUE_LABELS,
            )?,
            queue_message_ack_rate: gauge_vec(
                "queue_message_ack_rate",
                "Rate of messages acknowledged per second",
                QUEUE_LABELS,
            )?,
            queue_message_redeliver_rate: gauge_vec(
                "queue_message_redeliver_rate",
                "Rate of messages redelivered per second",
                QUEUE_LABELS,
            )?,
            queue_redeliveries_total: gauge_vec(
                "queue_redeliveries_total",
                "Cumulative number of redelivered messages reported by the broker",
                QUEUE_LABELS,
            )?,
            queue_consumers: gauge_vec(
                "queue_consumers",
                "Number of consumers attached to the queue",
                QUEUE_LABELS,
            )?,
            queue_consumer_utilisation: gauge_vec(
                "queue_consumer_utilisation",
                "Fraction of time consumers can take new messages (0-1)",
                QUEUE_LABELS,
            )?,
            queue_consumer_capacity: gauge_vec(
                "queue_consumer_capacity",
                "Consumer capacity, currently equal to consumer utilisation",
                QUEUE_LABELS,
            )?,
            queue_state: gauge_vec(
                "queue_state",
                "Queue state, 1 for the current state and 0 for the others",
                QUEUE_STATE_LABELS,
            )?,
            queue_is_dead_letter: gauge_vec(
                "queue_is_dead_letter",
                "Whether the queue is a dead letter queue (1) or not (0)",
                QUEUE_LABELS,
            )?,
            queue_health_score: gauge_vec(
                "queue_health_score",
                "Queue health score from 0 (unhealthy) to 100 (healthy)",
                QUEUE_LABELS,
            )?,
            queue_depth_alert: gauge_vec(
                "queue_depth_alert",
                "Queue depth alert by severity (1 firing, 0 clear)",
                QUEUE_SEVERITY_LABELS,
            )?,
            queue_utilization_alert: gauge_vec(
                "queue_utilization_alert",
                "Consumer utilisation alert by severity (1 firing, 0 clear)",
                QUEUE_SEVERITY_LABELS,
            )?,
            queue_idle_since_timestamp_seconds: gauge_vec(
                "queue_idle_since_timestamp_seconds",
                "Unix time the queue became idle, when the broker reports it",
                QUEUE_LABELS,
            )?,

            scrape_duration_seconds: Gauge::with_opts(opts(
                "scrape_duration_seconds",
                "Time spent rendering the last scrape",
            ))?,
            scrape_errors_total: IntCounterVec::new(
                opts(
                    "scrape_errors_total",
                    "Scrapes served from a stale snapshot, by the last upstream error",
                ),
                &["error_type"],
            )?,
            snapshot_timestamp_seconds: Gauge::with_opts(opts(
                "snapshot_timestamp_seconds",
                "Unix time of the last successful poll",
            ))?,
            snapshot_valid: Gauge::with_opts(opts(
                "snapshot_valid",
                "Whether the most recent poll succeeded (1) or failed (0)",
            ))?,
            circuit_breaker_state: gauge_vec(
                "circuit_breaker_state",
                "Circuit breaker state (0 closed, 1 open)",
                &["endpoint"],
            )?,
            circuit_breaker_consecutive_failures: gauge_vec(
                "circuit_breaker_consecutive_failures",
                "Consecutive upstream failures counted by the circuit breaker",
                &["endpoint"],
            )?,
            circuit_breaker_failures_total: IntCounterVec::new(
                opts(
                    "circuit_breaker_failures_total",
                    "Upstream failures recorded by the circuit breaker",
                ),
                &["endpoint"],
            )?,
        })
    }

    /// The queue-scoped families, cleared before each render.
    pub fn queue_families(&self) -> [&GaugeVec; 17] {
        [
            &self.queue_messages,
            &self.queue_messages_ready,
            &self.queue_messages_unacknowledged,
            &self.queue_message_publish_rate,
            &self.queue_message_deliver_rate,
            &self.queue_message_ack_rate,
            &self.queue_message_redeliver_rate,
            &self.queue_redeliveries_total,
            &self.queue_consumers,
            &self.queue_consumer_utilisation,
            &self.queue_consumer_capacity,
            &self.queue_state,
            &self.queue_is_dead_letter,
            &self.queue_health_score,
            &self.queue_depth_alert,
            &self.queue_utilization_alert,
            &self.queue_idle_since_timestamp_seconds,
        ]
    }

    /// Every family, in exposition order.
    pub fn collectors(&self) -> Vec<&dyn Collector> {
        let mut collectors: Vec<&dyn Collector> = self
            .queue_families()
            .into_iter()
            .map(|family| family as &dyn Collector)
            .collect();
        collectors.push(&self.scrape_duration_seconds);
        collectors.push(&self.scrape_errors_total);
        collectors.push(&self.snapshot_timestamp_seconds);
        collectors.push(&self.snapshot_valid);
        collectors.push(&self.circuit_breaker_state);
        collectors.push(&self.circuit_breaker_consecutive_failures);
        collectors.push(&self.circuit_breaker_failures_total);
        collectors
    }

    /// Drop every queue-scoped series.
    pub fn reset_queue_families(&self) {
        for family in self.queue_families() {
            family.reset();
        }
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(opts(name, help), labels)
}
