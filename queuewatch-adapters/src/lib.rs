//! # queuewatch-adapters
//!
//! Upstream access for queuewatch: a RabbitMQ Management API client that
//! bounds every call with a deadline, retries transport failures once and
//! protects the broker with a consecutive-failure circuit breaker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queuewatch_adapters::rabbitmq::ManagementClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ManagementClient::builder()
//!         .endpoint("http://localhost:15672")
//!         .credentials("guest", "guest")
//!         .build()?;
//!
//!     client.health_check(Duration::from_secs(10)).await?;
//!     let queues = client.fetch_queues(Duration::from_secs(30)).await?;
//!
//!     println!("Fetched {} queues", queues.len());
//!     Ok(())
//! }
//! ```

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

pub mod breaker;
pub mod error;
pub mod rabbitmq;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
pub use error::UpstreamError;

// Re-export types for convenience
pub use queuewatch_types::QueueRecord;

/// Trait for fetching queue statistics from a broker.
///
/// The background poller, the health endpoint and the metrics collector only
/// see the broker through this trait.
#[async_trait]
pub trait QueueSource: Send + Sync + Debug {
    /// Fetch the current list of queues, giving up after `deadline`.
    async fn fetch_queues(&self, deadline: Duration) -> Result<Vec<QueueRecord>, UpstreamError>;

    /// Check that the broker is reachable, giving up after `deadline`.
    async fn health_check(&self, deadline: Duration) -> Result<(), UpstreamError>;

    /// Current state of the circuit breaker guarding this source.
    ///
    /// Must not block or perform I/O; it is called on the scrape path.
    fn circuit_status(&self) -> CircuitStatus;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}
