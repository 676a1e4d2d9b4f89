//! # Concierge Core
//!
//! Orchestration core for the research concierge.
//! Provides the resilience adapter every outbound call passes through, the
//! session memory store, the pipeline stages, the quality loop, and the
//! orchestrator that composes them.

pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod parse;
pub mod persistence;
pub mod providers;
pub mod quality;
pub mod resilience;
pub mod stages;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{ConciergeConfig, load_config};
pub use error::{ConciergeError, ConfigError, FatalError, MemoryError, ProviderError, Result};
pub use memory::{MemoryStore, Session, SessionDelta, SessionSnapshot, SessionStatus};
pub use orchestrator::Orchestrator;
pub use parse::ParseOutcome;
pub use providers::{ProviderSet, build_providers};
pub use quality::{LoopOutcome, QualityLoop};
pub use resilience::{CallPolicy, OperationClass, PolicySet, ResilienceAdapter};
pub use types::{
    Brief, Intent, LoopTerminal, PipelineOutcome, QualityScore, ResearchQuery, SourceRecord,
    SourceSummary, Verdict, Warning,
};
