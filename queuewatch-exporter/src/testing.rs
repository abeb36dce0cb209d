//! Scripted [`QueueSource`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use queuewatch_adapters::{CircuitStatus, QueueSource, UpstreamError};
use queuewatch_types::QueueRecord;

/// Replays queued fetch outcomes, then repeats the last one.
#[derive(Debug)]
pub(crate) struct ScriptedSource {
    outcomes: Mutex<VecDeque<Result<Vec<QueueRecord>, UpstreamError>>>,
    last: Mutex<Result<Vec<QueueRecord>, UpstreamError>>,
    pub(crate) fetches: AtomicUsize,
    pub(crate) healthy: AtomicBool,
    pub(crate) status: Mutex<CircuitStatus>,
}

impl ScriptedSource {
    pub(crate) fn new(
        outcomes: impl IntoIterator<Item = Result<Vec<QueueRecord>, UpstreamError>>,
    ) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(Ok(Vec::new())),
            fetches: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            status: Mutex::new(CircuitStatus {
                open: false,
                failure_count: 0,
                last_failure: None,
                total_failures: 0,
            }),
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueSource for ScriptedSource {
    async fn fetch_queues(&self, _deadline: Duration) -> Result<Vec<QueueRecord>, UpstreamError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock();
        if let Some(next) = self.outcomes.lock().pop_front() {
            *last = next;
        }
        last.clone()
    }

    async fn health_check(&self, _deadline: Duration) -> Result<(), UpstreamError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UpstreamError::Transport("connection refused".to_string()))
        }
    }

    fn circuit_status(&self) -> CircuitStatus {
        *self.status.lock()
    }

    fn description(&self) -> &str {
        "scripted"
    }
}

/// A queue named `name` in the default vhost with `messages` ready.
pub(crate) fn queue(name: &str, messages: u64) -> QueueRecord {
    QueueRecord {
        messages,
        messages_ready: messages,
        ..QueueRecord::new(name, "/")
    }
}
