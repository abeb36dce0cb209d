//! Queue records as reported by the RabbitMQ Management API.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Argument key that routes rejected messages to a dead-letter exchange.
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Queue name suffixes that mark a queue as a dead-letter queue.
pub const DEAD_LETTER_SUFFIXES: [&str; 3] = [".dlq", ".dead", ".deadletter"];

/// One queue at a point in time, as returned by `GET /api/queues`.
///
/// Counters the broker omits (or reports as `null`) decode as zero, so a
/// freshly declared queue without statistics still produces a record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    #[serde(default)]
    pub vhost: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages_ready: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages_unacknowledged: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub consumers: u64,
    /// Fraction of time consumers can take new messages. Expected in
    /// `[0, 1]` but passed through unclamped.
    #[serde(default, deserialize_with = "null_as_default")]
    pub consumer_utilisation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_stats: Option<MessageStats>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: BTreeMap<String, serde_json::Value>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_since: Option<DateTime<Utc>>,
}

/// Cumulative message counters and their per-second rates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageStats {
    #[serde(default)]
    pub publish: u64,
    #[serde(default)]
    pub publish_details: Option<RateDetails>,
    #[serde(default)]
    pub deliver: u64,
    #[serde(default)]
    pub deliver_details: Option<RateDetails>,
    #[serde(default)]
    pub ack: u64,
    #[serde(default)]
    pub ack_details: Option<RateDetails>,
    #[serde(default)]
    pub redeliver: u64,
    #[serde(default)]
    pub redeliver_details: Option<RateDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RateDetails {
    #[serde(default)]
    pub rate: f64,
}

impl QueueRecord {
    /// Create a record with the given identity and all counters at zero.
    pub fn new(name: impl Into<String>, vhost: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vhost: vhost.into(),
            ..Self::default()
        }
    }

    /// Messages published per second (0 when the broker has no stats yet).
    pub fn publish_rate(&self) -> f64 {
        self.rate(|s| s.publish_details)
    }

    /// Messages delivered to consumers per second.
    pub fn deliver_rate(&self) -> f64 {
        self.rate(|s| s.deliver_details)
    }

    /// Messages acknowledged per second.
    pub fn ack_rate(&self) -> f64 {
        self.rate(|s| s.ack_details)
    }

    /// Messages redelivered per second.
    pub fn redeliver_rate(&self) -> f64 {
        self.rate(|s| s.redeliver_details)
    }

    /// Total redeliveries since the queue was declared.
    pub fn total_redeliveries(&self) -> u64 {
        self.message_stats.as_ref().map_or(0, |s| s.redeliver)
    }

    /// Whether this queue receives dead-lettered messages.
    ///
    /// A queue counts as a dead-letter queue when it declares a dead-letter
    /// exchange argument, or when its name ends in `.dlq`, `.dead` or
    /// `.deadletter` (case-sensitive).
    pub fn is_dead_letter(&self) -> bool {
        self.arguments.contains_key(DEAD_LETTER_EXCHANGE_ARG)
            || DEAD_LETTER_SUFFIXES
                .iter()
                .any(|suffix| self.name.ends_with(suffix))
    }

    fn rate(&self, details: impl Fn(&MessageStats) -> Option<RateDetails>) -> f64 {
        self.message_stats
            .as_ref()
            .and_then(details)
            .map_or(0.0, |d| d.rate)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// The management API reports `idle_since` as "2024-01-15 10:30:00" (UTC) on
// most versions and as RFC 3339 on newer ones. Anything else is dropped.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
