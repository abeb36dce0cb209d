//! # queuewatch
//!
//! A Prometheus exporter for RabbitMQ queue health.
//!
//! A background poller fetches queue statistics from the RabbitMQ Management
//! API into an in-memory snapshot; every scrape renders per-queue state,
//! health score and alert metrics from that snapshot without touching the
//! broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          queuewatch                          │
//! │  ┌──────────┐   ┌───────────────────┐   ┌─────────────────┐  │
//! │  │  config  │──▶│ queuewatch-       │──▶│ queuewatch-     │  │
//! │  │ (layers) │   │ adapters (client, │   │ exporter (poll, │  │
//! │  └──────────┘   │ circuit breaker)  │   │ cache, render,  │  │
//! │                 └───────────────────┘   │ HTTP)           │  │
//! │                                         └─────────────────┘  │
//! │                  queuewatch-types (records, derivations)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`config`]**: settings from defaults, `config.yaml`, `QUEUEWATCH_*`
//!   environment variables and command-line flags
//! - **[`duration`]**: human duration strings such as `"15s"` or `"2m"`
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: broker at http://localhost:15672, metrics on :9419
//! queuewatch
//!
//! # Poll one vhost every 30s
//! queuewatch --rabbitmq-url https://rabbit:15671 --vhost production --scrape-interval 30s
//! ```
//!
//! ### Loading settings as a library
//!
//! ```no_run
//! use queuewatch::config::{Overrides, Settings};
//!
//! let settings = Settings::load(&Overrides {
//!     listen_port: Some(9500),
//!     ..Default::default()
//! })
//! .unwrap();
//! assert_eq!(settings.listen_port, 9500);
//! ```

pub mod config;
pub mod duration;

pub use config::{ConfigError, Overrides, Settings};
