//! # queuewatch-exporter
//!
//! Turns broker polls into Prometheus metrics without putting the broker on
//! the scrape path.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  fetch   ┌────────┐ publish ┌───────────────┐
//! │ QueueSource  │ ◀─────── │ Poller │ ──────▶ │ SnapshotCache │
//! └──────────────┘          └────────┘         └───────┬───────┘
//!                                                      │ get
//!                   GET /metrics ┌──────────────┐      │
//!                  ────────────▶ │QueueCollector│ ◀────┘
//!                                └──────────────┘
//! ```
//!
//! The [`Poller`] is the only caller of the upstream client. Scrapes read the
//! [`SnapshotCache`] and derive every metric from the cached records, so
//! scrape latency never depends on the broker.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use prometheus::Registry;
//! use queuewatch_adapters::rabbitmq::ManagementClient;
//! use queuewatch_exporter::{serve, Poller, PollerConfig, QueueCollector, ServerState, SnapshotCache};
//! use queuewatch_types::Thresholds;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(ManagementClient::builder().build()?);
//!     let cache = Arc::new(SnapshotCache::new());
//!
//!     let config = PollerConfig::default();
//!     let poller = Poller::new(source.clone(), cache.clone(), config).start();
//!
//!     let registry = Registry::new();
//!     let collector = QueueCollector::new(cache, source.clone(), Thresholds::default(), config.interval)?;
//!     registry.register(Box::new(collector))?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9419").await?;
//!     let state = Arc::new(ServerState::new(registry, source));
//!     serve(listener, state, async { let _ = tokio::signal::ctrl_c().await; }, Duration::from_secs(30)).await;
//!
//!     poller.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod collector;
pub mod metrics;
pub mod poller;
pub mod server;

#[cfg(test)]
mod testing;

pub use cache::{Snapshot, SnapshotCache};
pub use collector::QueueCollector;
pub use metrics::ExporterMetrics;
pub use poller::{Poller, PollerConfig, PollerHandle};
pub use server::{serve, ServerState};
