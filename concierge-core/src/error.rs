//! Error types for the concierge core.
//!
//! Uses `thiserror` for public API error types. Outbound calls fail with
//! [`ProviderError`], which stages degrade around; only [`FatalError`]
//! terminates a pipeline run.

use uuid::Uuid;

use crate::resilience::OperationClass;

/// Top-level error type for the concierge core library.
#[derive(Debug, thiserror::Error)]
pub enum ConciergeError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Fatal pipeline error: {0}")]
    Fatal(#[from] FatalError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by outbound providers and by the resilience adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Network failure or timeout. Retried, then triggers fallback.
    #[error("{provider} failed transiently: {message}")]
    Transient { provider: String, message: String },

    /// The provider refused for quota reasons. Never retried against the same provider.
    #[error("{provider} quota exceeded")]
    QuotaExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider} rejected the request: {message}")]
    NonRetryable { provider: String, message: String },

    #[error("{provider} returned a response that does not match the expected schema: {message}")]
    SchemaParse { provider: String, message: String },

    #[error("No {operation} permit within {waited_ms}ms")]
    PermitTimeout {
        operation: OperationClass,
        waited_ms: u64,
    },

    /// Every provider in the fallback chain failed. `chain` holds the final
    /// error of each provider, in chain order.
    #[error("All {operation} providers exhausted ({} failures)", .chain.len())]
    Exhausted {
        operation: OperationClass,
        chain: Vec<ProviderError>,
    },
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::Transient { provider, .. }
            | ProviderError::QuotaExceeded { provider, .. }
            | ProviderError::NonRetryable { provider, .. }
            | ProviderError::SchemaParse { provider, .. } => Some(provider),
            ProviderError::PermitTimeout { .. } | ProviderError::Exhausted { .. } => None,
        }
    }
}

/// Errors that terminate a pipeline run. Each carries a stable taxonomy code.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("No usable sources remained after gathering for '{question}'")]
    InputExhaustion { question: String },

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Pipeline exceeded its {timeout_ms}ms deadline")]
    PipelineTimeout { timeout_ms: u64 },

    #[error("Session {session_id} already has a run in flight")]
    SessionBusy { session_id: Uuid },

    #[error("Session store failure: {0}")]
    Memory(#[from] MemoryError),
}

impl FatalError {
    pub fn code(&self) -> &'static str {
        match self {
            FatalError::InputExhaustion { .. } => "INPUT_EXHAUSTION",
            FatalError::Configuration(_) => "CONFIGURATION",
            FatalError::PipelineTimeout { .. } => "PIPELINE_TIMEOUT",
            FatalError::SessionBusy { .. } => "SESSION_BUSY",
            FatalError::Memory(_) => "SESSION_STORE",
        }
    }
}

/// Errors from the session memory store.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Session not found: {id}")]
    SessionNotFound { id: Uuid },

    #[error("Session {id} is closed")]
    SessionClosed { id: Uuid },

    #[error("{kind} {id} references an unknown record")]
    DanglingReference { kind: &'static str, id: Uuid },

    #[error("Iteration index {got} does not follow {last}")]
    NonMonotonicIteration { last: u32, got: u32 },

    #[error("Unsupported snapshot format version {found} (expected {expected})")]
    SnapshotVersion { found: u32, expected: u32 },

    #[error("Session persistence error: {message}")]
    Persistence { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Result type alias for concierge operations.
pub type Result<T> = std::result::Result<T, ConciergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_codes() {
        assert_eq!(
            FatalError::InputExhaustion {
                question: "x".into()
            }
            .code(),
            "INPUT_EXHAUSTION"
        );
        let err = FatalError::from(ConfigError::MissingCredential {
            var: "GEMINI_API_KEY".into(),
        });
        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        assert_eq!(
            FatalError::PipelineTimeout { timeout_ms: 10 }.code(),
            "PIPELINE_TIMEOUT"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let transient = ProviderError::Transient {
            provider: "google".into(),
            message: "connection reset".into(),
        };
        let quota = ProviderError::QuotaExceeded {
            provider: "google".into(),
            retry_after_secs: Some(30),
        };
        assert!(transient.is_retryable());
        assert!(!quota.is_retryable());
        assert_eq!(quota.provider(), Some("google"));
    }

    #[test]
    fn test_exhausted_display_counts_chain() {
        let err = ProviderError::Exhausted {
            operation: OperationClass::Search,
            chain: vec![
                ProviderError::Transient {
                    provider: "a".into(),
                    message: "down".into(),
                },
                ProviderError::NonRetryable {
                    provider: "b".into(),
                    message: "bad key".into(),
                },
            ],
        };
        assert_eq!(err.to_string(), "All search providers exhausted (2 failures)");
    }

    #[test]
    fn test_error_conversion() {
        let err: ConciergeError = MemoryError::SessionNotFound { id: Uuid::nil() }.into();
        assert!(matches!(err, ConciergeError::Memory(_)));
    }
}
