//! Resilience adapter: the single path for every outbound call.
//!
//! Each call is checked against the response cache, then waits for a
//! rate-limit permit, then runs against the provider chain in order. A
//! provider that fails transiently is retried with exponential backoff;
//! quota and non-retryable failures (or exhausted retries) advance to the
//! next provider with a fresh retry budget. A permit wait that outlasts the
//! policy's timeout also advances the chain. Cache, limiter, and counters are
//! shared per [`OperationClass`].

pub mod cache;
pub mod policy;
pub mod rate_limiter;

pub use cache::{CacheKey, CacheMetrics, ResponseCache, derive_key};
pub use policy::{
    BackoffPolicy, CachePolicy, CallPolicy, OperationClass, PolicySet, RateLimitPolicy, deadline_after,
};
pub use rate_limiter::SlidingWindowLimiter;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::providers::Provider;

/// Counters for one operation class.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub cache: CacheMetrics,
    pub permits_granted: u64,
    pub provider_calls: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub exhausted: u64,
}

#[derive(Default)]
struct LaneCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_calls: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    exhausted: AtomicU64,
}

/// Shared state for one operation class.
struct Lane {
    policy: CallPolicy,
    limiter: SlidingWindowLimiter,
    cache: ResponseCache,
    counters: LaneCounters,
}

pub struct ResilienceAdapter {
    /// Indexed by `OperationClass as usize`.
    lanes: Vec<Lane>,
}

impl ResilienceAdapter {
    pub fn new(policies: PolicySet) -> Self {
        let lanes = OperationClass::ALL
            .iter()
            .map(|op| {
                let policy = policies.get(*op).clone();
                Lane {
                    limiter: SlidingWindowLimiter::new(*op),
                    cache: ResponseCache::new(policy.cache),
                    counters: LaneCounters::default(),
                    policy,
                }
            })
            .collect();
        Self { lanes }
    }

    fn lane(&self, operation: OperationClass) -> &Lane {
        &self.lanes[operation as usize]
    }

    pub fn policy(&self, operation: OperationClass) -> &CallPolicy {
        &self.lane(operation).policy
    }

    pub fn stats(&self, operation: OperationClass) -> OperationStats {
        let lane = self.lane(operation);
        let c = &lane.counters;
        OperationStats {
            cache: CacheMetrics {
                hits: c.cache_hits.load(Ordering::Relaxed),
                misses: c.cache_misses.load(Ordering::Relaxed),
            },
            permits_granted: lane.limiter.granted(),
            provider_calls: c.provider_calls.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Invoke `operation` against `chain` (primary first) under the class's policy.
    pub async fn invoke<Req, Out>(
        &self,
        operation: OperationClass,
        payload: &Req,
        chain: &[Arc<dyn Provider<Req, Out>>],
    ) -> Result<Out, ProviderError>
    where
        Req: CacheKey + Send + Sync,
        Out: Serialize + DeserializeOwned + Send,
    {
        let lane = self.lane(operation);
        let key = if lane.cache.is_enabled() {
            payload
                .cache_material()
                .map(|material| derive_key(operation, &material))
        } else {
            None
        };

        if let Some(key) = &key {
            if let Some(bytes) = lane.cache.get(key) {
                match serde_json::from_slice::<Out>(&bytes) {
                    Ok(value) => {
                        lane.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                        debug!(operation = %operation, "Cache hit");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(operation = %operation, error = %e, "Discarding undecodable cache entry");
                    }
                }
            }
            lane.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let mut failures = Vec::with_capacity(chain.len());
        for (index, provider) in chain.iter().enumerate() {
            if index > 0 {
                lane.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                info!(
                    operation = %operation,
                    provider = provider.name(),
                    provider_index = index,
                    "Falling back to next provider"
                );
            }

            let mut attempt: u32 = 0;
            loop {
                if let Err(e) = lane.limiter.acquire(&lane.policy.rate_limit).await {
                    warn!(
                        operation = %operation,
                        provider = provider.name(),
                        error = %e,
                        "No permit, trying next provider"
                    );
                    failures.push(e);
                    break;
                }
                lane.counters.provider_calls.fetch_add(1, Ordering::Relaxed);

                match call_once(&lane.policy, provider.as_ref(), payload).await {
                    Ok(value) => {
                        if let Some(key) = &key {
                            match serde_json::to_vec(&value) {
                                Ok(bytes) => lane.cache.insert(key.clone(), bytes),
                                Err(e) => {
                                    warn!(operation = %operation, error = %e, "Response not cacheable")
                                }
                            }
                        }
                        return Ok(value);
                    }
                    Err(e) if e.is_retryable() && attempt < lane.policy.backoff.max_retries => {
                        let delay = lane.policy.backoff.delay_for(attempt);
                        info!(
                            operation = %operation,
                            provider = provider.name(),
                            attempt = attempt + 1,
                            max_retries = lane.policy.backoff.max_retries,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying after transient error"
                        );
                        lane.counters.retries.fetch_add(1, Ordering::Relaxed);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(
                            operation = %operation,
                            provider = provider.name(),
                            provider_index = index,
                            error = %e,
                            "Provider failed, trying next"
                        );
                        failures.push(e);
                        break;
                    }
                }
            }
        }

        lane.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(ProviderError::Exhausted {
            operation,
            chain: failures,
        })
    }
}

async fn call_once<Req, Out>(
    policy: &CallPolicy,
    provider: &dyn Provider<Req, Out>,
    payload: &Req,
) -> Result<Out, ProviderError>
where
    Req: Send + Sync,
    Out: Send,
{
    match policy.call_timeout {
        Some(limit) => match tokio::time::timeout(limit, provider.call(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient {
                provider: provider.name().to_string(),
                message: format!("timed out after {}ms", limit.as_millis()),
            }),
        },
        None => provider.call(payload).await,
    }
}
