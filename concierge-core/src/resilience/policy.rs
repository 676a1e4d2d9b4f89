//! Call policies: the independent strategies the adapter composes for each
//! operation class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "no deadline": roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + limit`, saturating at a far-future instant instead of overflowing.
pub fn deadline_after(start: Instant, limit: Duration) -> Instant {
    start
        .checked_add(limit)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Class of outbound operation. Rate-limit and cache state is shared by
/// every caller of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Search,
    Scrape,
    DocumentExtract,
    Generation,
}

impl OperationClass {
    pub const ALL: [OperationClass; 4] = [
        OperationClass::Search,
        OperationClass::Scrape,
        OperationClass::DocumentExtract,
        OperationClass::Generation,
    ];
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Search => "search",
            OperationClass::Scrape => "scrape",
            OperationClass::DocumentExtract => "document_extract",
            OperationClass::Generation => "generation",
        };
        f.write_str(name)
    }
}

/// At most `max_calls` permits per rolling `window`. `max_calls == 0`
/// disables limiting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub max_calls: usize,
    pub window: Duration,
    /// Longest a caller may block waiting for a permit.
    pub permit_timeout: Duration,
}

impl RateLimitPolicy {
    pub fn unlimited() -> Self {
        Self {
            max_calls: 0,
            window: Duration::from_secs(1),
            permit_timeout: Duration::from_secs(1),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.max_calls > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: u64,
}

impl CachePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
            max_entries: 0,
        }
    }
}

/// Exponential backoff between retries against the same provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt, per provider.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay)
    }
}

/// Everything the adapter needs to know about calling one operation class.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub rate_limit: RateLimitPolicy,
    pub cache: CachePolicy,
    pub backoff: BackoffPolicy,
    /// Per-attempt timeout. An attempt that exceeds it counts as transient.
    pub call_timeout: Option<Duration>,
}

impl CallPolicy {
    /// Built-in defaults per operation class.
    pub fn default_for(operation: OperationClass) -> Self {
        let backoff = BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        };
        match operation {
            OperationClass::Search => Self {
                rate_limit: RateLimitPolicy {
                    max_calls: 10,
                    window: Duration::from_secs(10),
                    permit_timeout: Duration::from_secs(30),
                },
                cache: CachePolicy {
                    enabled: true,
                    ttl: Duration::from_secs(3600),
                    max_entries: 100,
                },
                backoff,
                call_timeout: Some(Duration::from_secs(15)),
            },
            OperationClass::Scrape => Self {
                rate_limit: RateLimitPolicy {
                    max_calls: 10,
                    window: Duration::from_secs(10),
                    permit_timeout: Duration::from_secs(30),
                },
                cache: CachePolicy {
                    enabled: true,
                    ttl: Duration::from_secs(3600),
                    max_entries: 200,
                },
                backoff,
                call_timeout: Some(Duration::from_secs(15)),
            },
            OperationClass::DocumentExtract => Self {
                rate_limit: RateLimitPolicy::unlimited(),
                cache: CachePolicy::disabled(),
                backoff: BackoffPolicy {
                    max_retries: 0,
                    ..backoff
                },
                call_timeout: Some(Duration::from_secs(120)),
            },
            OperationClass::Generation => Self {
                rate_limit: RateLimitPolicy {
                    max_calls: 60,
                    window: Duration::from_secs(60),
                    permit_timeout: Duration::from_secs(60),
                },
                cache: CachePolicy {
                    enabled: true,
                    ttl: Duration::from_secs(3600),
                    max_entries: 500,
                },
                backoff,
                call_timeout: Some(Duration::from_secs(60)),
            },
        }
    }
}

/// One policy per operation class.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    pub search: CallPolicy,
    pub scrape: CallPolicy,
    pub document_extract: CallPolicy,
    pub generation: CallPolicy,
}

impl PolicySet {
    pub fn get(&self, operation: OperationClass) -> &CallPolicy {
        match operation {
            OperationClass::Search => &self.search,
            OperationClass::Scrape => &self.scrape,
            OperationClass::DocumentExtract => &self.document_extract,
            OperationClass::Generation => &self.generation,
        }
    }

    /// Apply `f` to every class's policy.
    pub fn map(mut self, f: impl Fn(&mut CallPolicy)) -> Self {
        f(&mut self.search);
        f(&mut self.scrape);
        f(&mut self.document_extract);
        f(&mut self.generation);
        self
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            search: CallPolicy::default_for(OperationClass::Search),
            scrape: CallPolicy::default_for(OperationClass::Scrape),
            document_extract: CallPolicy::default_for(OperationClass::DocumentExtract),
            generation: CallPolicy::default_for(OperationClass::Generation),
        }
    }
}
