//! Fetch retries with exponential backoff.
//!
//! [`RetryingGateway`] decorates any [`FetchGateway`] and retries failed
//! fetches according to a [`RetryPolicy`]. The scheduler owns the retry
//! policy; gateways themselves make a single attempt.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=250ms)
//! ```

use async_trait::async_trait;
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::errors::FetchError;
use crate::fetch::FetchGateway;
use crate::models::{RawDocument, Source};

/// How often and how patiently a failed fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Add up to 250ms of random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        if self.jitter {
            let jitter_ms: u64 = rng().random_range(0..=250);
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }
}

/// Wraps a gateway with retry logic.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGateway<G>
where
    G: FetchGateway,
{
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<G> fmt::Debug for RetryingGateway<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingGateway")
            .field("policy", &self.policy)
            .finish()
    }
}

#[async_trait]
impl<G> FetchGateway for RetryingGateway<G>
where
    G: FetchGateway,
{
    async fn fetch(&self, source: &Source) -> Result<RawDocument, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch(source).await {
                Ok(doc) => return Ok(doc),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if attempt > self.policy.max_retries {
                        error!(
                            source = %source.id,
                            attempt,
                            max = self.policy.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        source = %source.id,
                        attempt,
                        max = self.policy.max_retries,
                        elapsed_ms_attempt,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
