//! Derived queue signals: state classification, health score and alerts.
//!
//! Everything here is a pure function of a [`QueueRecord`] and is recomputed
//! on every scrape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::QueueRecord;

/// Publish rate below which a consumer-less queue counts as idle.
const IDLE_PUBLISH_RATE: f64 = 0.01;
/// Deliver rate below which a consumed queue is considered stalled.
const BLOCKED_DELIVER_RATE: f64 = 0.1;
/// Publish rate above which a stalled queue counts as blocked.
const BLOCKED_PUBLISH_RATE: f64 = 1.0;

const MAX_HEALTH_SCORE: f64 = 100.0;
const DEPTH_WARNING_PENALTY: f64 = 20.0;
const DEPTH_CRITICAL_PENALTY: f64 = 30.0;
const UTILISATION_WARNING_PENALTY: f64 = 25.0;
const UTILISATION_CRITICAL_PENALTY: f64 = 40.0;
const REDELIVER_WARNING_PENALTY: f64 = 15.0;
const REDELIVER_CRITICAL_PENALTY: f64 = 25.0;

/// Activity classification of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Idle,
    Active,
    Blocked,
}

impl QueueState {
    /// All states, in label order.
    pub const ALL: [QueueState; 3] = [QueueState::Idle, QueueState::Active, QueueState::Blocked];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Idle => "idle",
            QueueState::Active => "active",
            QueueState::Blocked => "blocked",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// One alert series: its severity and whether it is currently firing.
///
/// Both severities are always reported so that a cleared alert shows up as
/// an explicit `0` rather than a missing series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub firing: bool,
}

/// Thresholds for health scoring and alerting.
///
/// Depth thresholds are exclusive lower bounds (`messages > depth_warning`),
/// utilisation thresholds exclusive upper bounds (`utilisation < ...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub depth_warning: u64,
    pub depth_critical: u64,
    pub utilisation_warning: f64,
    pub utilisation_critical: f64,
    pub redeliver_warning: f64,
    pub redeliver_critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            depth_warning: 1_000,
            depth_critical: 10_000,
            utilisation_warning: 0.10,
            utilisation_critical: 0.01,
            redeliver_warning: 1.0,
            redeliver_critical: 5.0,
        }
    }
}

impl QueueRecord {
    /// Classify the queue as idle, active or blocked.
    ///
    /// - idle: no consumers, and either empty or not being published to
    /// - blocked: consumers attached and messages waiting, but delivery has
    ///   stalled while publishers keep going
    /// - active: anything else
    ///
    /// A rate the broker has not reported yet never makes a queue idle or
    /// blocked: without publish details a non-empty queue is not idle, and
    /// without deliver details it is not blocked.
    pub fn state(&self) -> QueueState {
        let stats = self.message_stats.as_ref();
        let publish = stats.and_then(|s| s.publish_details).map(|d| d.rate);
        let deliver = stats.and_then(|s| s.deliver_details).map(|d| d.rate);

        if self.consumers == 0
            && (self.messages == 0 || publish.is_some_and(|rate| rate < IDLE_PUBLISH_RATE))
        {
            return QueueState::Idle;
        }

        if self.consumers > 0
            && self.messages > 0
            && deliver.is_some_and(|rate| rate < BLOCKED_DELIVER_RATE)
            && publish.unwrap_or(0.0) > BLOCKED_PUBLISH_RATE
        {
            return QueueState::Blocked;
        }

        QueueState::Active
    }

    /// Health score in `[0, 100]`, higher is better.
    ///
    /// Penalties stack: a queue past the critical depth also pays the
    /// warning penalty.
    pub fn health_score(&self, thresholds: &Thresholds) -> f64 {
        let mut score = MAX_HEALTH_SCORE;

        if self.messages > thresholds.depth_warning {
            score -= DEPTH_WARNING_PENALTY;
        }
        if self.messages > thresholds.depth_critical {
            score -= DEPTH_CRITICAL_PENALTY;
        }

        if self.consumer_utilisation < thresholds.utilisation_warning {
            score -= UTILISATION_WARNING_PENALTY;
        }
        if self.consumer_utilisation < thresholds.utilisation_critical {
            score -= UTILISATION_CRITICAL_PENALTY;
        }

        let redeliver_rate = self.redeliver_rate();
        if redeliver_rate > thresholds.redeliver_warning {
            score -= REDELIVER_WARNING_PENALTY;
        }
        if redeliver_rate > thresholds.redeliver_critical {
            score -= REDELIVER_CRITICAL_PENALTY;
        }

        score.max(0.0)
    }

    /// Queue depth alerts, warning first.
    pub fn depth_alerts(&self, thresholds: &Thresholds) -> [Alert; 2] {
        [
            Alert {
                severity: Severity::Warning,
                firing: self.messages > thresholds.depth_warning,
            },
            Alert {
                severity: Severity::Critical,
                firing: self.messages > thresholds.depth_critical,
            },
        ]
    }

    /// Consumer utilisation alerts, warning first.
    pub fn utilisation_alerts(&self, thresholds: &Thresholds) -> [Alert; 2] {
        [
            Alert {
                severity: Severity::Warning,
                firing: self.consumer_utilisation < thresholds.utilisation_warning,
            },
            Alert {
                severity: Severity::Critical,
                firing: self.consumer_utilisation < thresholds.utilisation_critical,
            },
        ]
    }
}
