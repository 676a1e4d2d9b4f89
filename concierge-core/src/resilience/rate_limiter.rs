//! Sliding-window rate limiter shared by every caller of one operation class.
//!
//! Callers block until a slot opens rather than failing, up to the policy's
//! permit timeout. Grant timestamps live behind an async mutex so concurrent
//! callers never double-count a slot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::policy::{OperationClass, RateLimitPolicy, deadline_after};
use crate::error::ProviderError;

pub struct SlidingWindowLimiter {
    operation: OperationClass,
    /// Timestamps of permits granted within the most recent window.
    grants: Mutex<VecDeque<Instant>>,
    granted_total: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new(operation: OperationClass) -> Self {
        Self {
            operation,
            grants: Mutex::new(VecDeque::new()),
            granted_total: AtomicU64::new(0),
        }
    }

    /// Wait for a permit. Returns how long the caller waited.
    pub async fn acquire(&self, policy: &RateLimitPolicy) -> Result<Duration, ProviderError> {
        let started = Instant::now();
        if !policy.is_limited() {
            self.granted_total.fetch_add(1, Ordering::Relaxed);
            return Ok(Duration::ZERO);
        }
        let deadline = deadline_after(started, policy.permit_timeout);

        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                match check(&mut grants, policy, now) {
                    None => {
                        grants.push_back(now);
                        self.granted_total.fetch_add(1, Ordering::Relaxed);
                        return Ok(now.saturating_duration_since(started));
                    }
                    Some(wait) => wait,
                }
            };

            if deadline_after(Instant::now(), wait) > deadline {
                let waited = Instant::now().saturating_duration_since(started);
                debug!(
                    operation = %self.operation,
                    waited_ms = waited.as_millis() as u64,
                    "Rate-limit permit unavailable before timeout"
                );
                return Err(ProviderError::PermitTimeout {
                    operation: self.operation,
                    waited_ms: policy.permit_timeout.as_millis() as u64,
                });
            }

            debug!(
                operation = %self.operation,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate-limit slot"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Total permits granted since creation.
    pub fn granted(&self) -> u64 {
        self.granted_total.load(Ordering::Relaxed)
    }

    /// Permits granted within the current window.
    pub async fn current_usage(&self, policy: &RateLimitPolicy) -> usize {
        let mut grants = self.grants.lock().await;
        prune(&mut grants, policy.window, Instant::now());
        grants.len()
    }
}

/// `None` if a permit can be granted at `now`, otherwise the time until the
/// oldest grant leaves the window.
fn check(grants: &mut VecDeque<Instant>, policy: &RateLimitPolicy, now: Instant) -> Option<Duration> {
    prune(grants, policy.window, now);
    if grants.len() < policy.max_calls {
        return None;
    }
    let oldest = *grants.front()?;
    let wait = policy
        .window
        .saturating_sub(now.saturating_duration_since(oldest));
    Some(wait.max(Duration::from_millis(1)))
}

/// Drop grants that are a full window old or older.
fn prune(grants: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while grants
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        grants.pop_front();
    }
}
