//! # queuewatch-types
//!
//! Core types for queuewatch: the per-queue record decoded from the RabbitMQ
//! Management API, and the pure derivations computed from it on every scrape.
//!
//! ## Design Goals
//!
//! - **Immutable records**: a [`QueueRecord`] is never modified after decoding
//! - **Derived, not stored**: state, health score and alerts are recomputed on
//!   every read from the raw counters
//! - **Lenient decoding**: missing or `null` counters decode as zero
//!
//! ## Example
//!
//! ```rust
//! use queuewatch_types::{QueueRecord, QueueState, Thresholds};
//!
//! let queue: QueueRecord = serde_json::from_str(
//!     r#"{"name":"orders.dlq","vhost":"/","messages":0,"consumers":0}"#,
//! ).unwrap();
//!
//! assert_eq!(queue.state(), QueueState::Idle);
//! assert!(queue.is_dead_letter());
//! assert_eq!(queue.health_score(&Thresholds::default()), 35.0);
//! ```

mod health;
mod queue;

pub use health::*;
pub use queue::*;
