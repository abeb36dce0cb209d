//! RabbitMQ Management API client.
//!
//! Every call goes through the same pipeline:
//!
//! 1. The [`CircuitBreaker`] is consulted. An open circuit fails the call with
//!    [`UpstreamError::CircuitOpen`] without touching the network.
//! 2. The request is sent with basic auth. A transport failure is retried
//!    once after a short backoff.
//! 3. The body is read up to a fixed ceiling, then checked for a 2xx status
//!    and decoded.
//! 4. The outcome (success, or any failure including the caller's deadline
//!    expiring) is reported back to the breaker.
//!
//! ## Example
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
//!     let queues = client.fetch_queues(Duration::from_secs(30)).await?;
//!     for queue in &queues {
//!         println!("{} ({}): {} messages", queue.name, queue.vhost, queue.messages);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use tracing::debug;

use queuewatch_types::QueueRecord;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
use crate::{QueueSource, UpstreamError};

/// Upper bound on a response body; anything larger is rejected.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Pause before the single retry of a transport failure.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const DEFAULT_ENDPOINT: &str = "http://localhost:15672";
const DEFAULT_USERNAME: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Client for the RabbitMQ Management HTTP API.
///
/// Owns the circuit breaker for its endpoint; the breaker is only ever
/// mutated by the outcome of calls made through this client.
#[derive(Debug)]
pub struct ManagementClient {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
    vhost: Option<String>,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl ManagementClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ManagementClientBuilder {
        ManagementClientBuilder::default()
    }

    /// Fetch statistics for all queues (or the configured vhost's queues).
    ///
    /// `deadline` bounds the whole call, including the retry.
    pub async fn fetch_queues(&self, deadline: Duration) -> Result<Vec<QueueRecord>, UpstreamError> {
        let url = self.queues_url();
        self.guarded(deadline, async {
            let body = self.get_with_retry(&url).await?;
            serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
        })
        .await
    }

    /// Check that the broker answers `GET /api/overview` with a 2xx.
    pub async fn health_check(&self, deadline: Duration) -> Result<(), UpstreamError> {
        let url = format!("{}/api/overview", self.endpoint);
        self.guarded(deadline, async {
            let response = self.send(&url).await?;
            read_success_body(response).await.map(|_| ())
        })
        .await
    }

    /// Current circuit breaker state.
    pub fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    /// The Management API base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-request HTTP timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn guarded<T, F>(&self, deadline: Duration, call: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        if !self.breaker.allow_request() {
            return Err(UpstreamError::CircuitOpen);
        }

        let outcome = tokio::time::timeout(deadline, call)
            .await
            .unwrap_or(Err(UpstreamError::Timeout));

        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.counts_as_failure() => self.breaker.record_failure(),
            Err(_) => {}
        }
        outcome
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let response = match self.send(url).await {
            Ok(response) => response,
            Err(err) => {
                debug!(url, error = %err, "request failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.send(url).await?
            }
        };

        read_success_body(response).await
    }

    async fn send(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
            .send()
            .await
    }

    fn queues_url(&self) -> String {
        match &self.vhost {
            Some(vhost) => format!("{}/api/queues/{}", self.endpoint, urlencoded(vhost)),
            None => format!("{}/api/queues", self.endpoint),
        }
    }
}

#[async_trait]
impl QueueSource for ManagementClient {
    async fn fetch_queues(&self, deadline: Duration) -> Result<Vec<QueueRecord>, UpstreamError> {
        ManagementClient::fetch_queues(self, deadline).await
    }

    async fn health_check(&self, deadline: Duration) -> Result<(), UpstreamError> {
        ManagementClient::health_check(self, deadline).await
    }

    fn circuit_status(&self) -> CircuitStatus {
        ManagementClient::circuit_status(self)
    }

    fn description(&self) -> &str {
        &self.endpoint
    }
}

/// Read the body (bounded by [`MAX_BODY_BYTES`]) and fail on non-2xx.
async fn read_success_body(mut response: Response) -> Result<Vec<u8>, UpstreamError> {
    let status = response.status();

    if response
        .content_length()
        .is_some_and(|len| len > MAX_BODY_BYTES as u64)
    {
        return Err(UpstreamError::BodyTooLarge {
            limit: MAX_BODY_BYTES,
        });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(UpstreamError::BodyTooLarge {
                limit: MAX_BODY_BYTES,
            });
        }
        body.extend_from_slice(&chunk);
    }

    if !status.is_success() {
        return Err(UpstreamError::from_status(status.as_u16(), &body));
    }
    Ok(body)
}

/// Builder for [`ManagementClient`].
#[derive(Debug, Default)]
pub struct ManagementClientBuilder {
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    vhost: Option<String>,
    timeout: Option<Duration>,
    breaker: Option<CircuitBreakerConfig>,
}

impl ManagementClientBuilder {
    /// Set the Management API endpoint (e.g., "http://localhost:15672").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the username and password for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Restrict queries to a single vhost (default: all vhosts).
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    /// Set the per-request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the circuit breaker configuration.
    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    /// Build the client.
    ///
    /// Empty strings and a zero timeout fall back to the defaults.
    pub fn build(self) -> Result<ManagementClient, UpstreamError> {
        let timeout = self
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT);

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        let endpoint = non_empty(self.endpoint).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(ManagementClient {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: non_empty(self.username).unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password: non_empty(self.password).unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            vhost: non_empty(self.vhost),
            timeout,
            breaker: CircuitBreaker::new(self.breaker.unwrap_or_default()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

// URL encode a string for use in paths
fn urlencoded(s: &str) -> String {
    s.replace('%', "%25").replace('/', "%2F")
}
