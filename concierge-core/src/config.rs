//! Configuration system for the concierge.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration
//! is loaded from `~/.config/concierge/config.toml` and/or
//! `.concierge/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::{BackoffPolicy, CachePolicy, CallPolicy, OperationClass, PolicySet, RateLimitPolicy};
use crate::types::{QueryConfig, Stage};

/// Longest accepted pipeline, stage, permit or call timeout: one week.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Longest accepted rate-limit window or cache TTL: one year.
pub const MAX_RETENTION_SECS: u64 = 365 * 24 * 3600;

fn check_bound(field: String, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid {
            message: format!("{field} = {value} exceeds the maximum of {max}"),
        });
    }
    Ok(())
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    pub generation: GenerationConfig,
    pub search: SearchConfig,
    pub documents: DocumentConfig,
    pub resilience: ResilienceConfig,
    pub pipeline: PipelineConfig,
    /// Defaults applied to queries that do not carry their own settings.
    pub query: QueryConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    /// Models tried in order after `model` fails.
    pub fallback_models: Vec<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            fallback_models: vec!["gemini-1.5-flash".to_string()],
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
            temperature: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub google_api_key_env: String,
    pub google_engine_id_env: String,
    pub duckduckgo_fallback: bool,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Scraped lines this short or shorter are treated as navigation and dropped.
    pub min_line_chars: usize,
    pub max_page_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            google_api_key_env: "GOOGLE_API_KEY".to_string(),
            google_engine_id_env: "GOOGLE_CSE_ID".to_string(),
            duckduckgo_fallback: true,
            timeout_secs: 15,
            user_agent: "Mozilla/5.0 (compatible; concierge/0.1)".to_string(),
            min_line_chars: 20,
            max_page_chars: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Paragraphs shorter than this are not treated as key sections.
    pub min_section_chars: usize,
    /// Key sections summarized individually per document.
    pub max_sections_per_document: usize,
    pub section_excerpt_chars: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            min_section_chars: 100,
            max_sections_per_document: 5,
            section_excerpt_chars: 500,
        }
    }
}

/// Serializable form of a [`CallPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Permits per window; 0 disables rate limiting.
    pub max_calls: usize,
    pub window_secs: u64,
    pub permit_timeout_secs: u64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    pub call_timeout_secs: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::from_policy(&CallPolicy::default_for(OperationClass::Generation))
    }
}

impl PolicyConfig {
    pub fn from_policy(policy: &CallPolicy) -> Self {
        Self {
            max_calls: policy.rate_limit.max_calls,
            window_secs: policy.rate_limit.window.as_secs(),
            permit_timeout_secs: policy.rate_limit.permit_timeout.as_secs(),
            cache_enabled: policy.cache.enabled,
            cache_ttl_secs: policy.cache.ttl.as_secs(),
            cache_max_entries: policy.cache.max_entries,
            max_retries: policy.backoff.max_retries,
            backoff_base_ms: policy.backoff.base_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff.multiplier,
            backoff_max_ms: policy.backoff.max_delay.as_millis() as u64,
            call_timeout_secs: policy.call_timeout.map(|t| t.as_secs()),
        }
    }

    pub fn to_policy(&self) -> CallPolicy {
        CallPolicy {
            rate_limit: RateLimitPolicy {
                max_calls: self.max_calls,
                window: Duration::from_secs(self.window_secs),
                permit_timeout: Duration::from_secs(self.permit_timeout_secs),
            },
            cache: CachePolicy {
                enabled: self.cache_enabled,
                ttl: Duration::from_secs(self.cache_ttl_secs),
                max_entries: self.cache_max_entries,
            },
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                multiplier: self.backoff_multiplier,
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_calls > 0 && self.window_secs == 0 {
            return Err(ConfigError::Invalid {
                message: format!("resilience.{name}: window_secs must be positive when max_calls is set"),
            });
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ConfigError::Invalid {
                message: format!("resilience.{name}: backoff_multiplier must be >= 1.0"),
            });
        }
        check_bound(format!("resilience.{name}.permit_timeout_secs"), self.permit_timeout_secs, MAX_TIMEOUT_SECS)?;
        check_bound(
            format!("resilience.{name}.call_timeout_secs"),
            self.call_timeout_secs.unwrap_or(0),
            MAX_TIMEOUT_SECS,
        )?;
        check_bound(format!("resilience.{name}.backoff_max_ms"), self.backoff_max_ms / 1000, MAX_TIMEOUT_SECS)?;
        check_bound(format!("resilience.{name}.window_secs"), self.window_secs, MAX_RETENTION_SECS)?;
        check_bound(format!("resilience.{name}.cache_ttl_secs"), self.cache_ttl_secs, MAX_RETENTION_SECS)

    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub search: PolicyConfig,
    pub scrape: PolicyConfig,
    pub document_extract: PolicyConfig,
    pub generation: PolicyConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            search: PolicyConfig::from_policy(&CallPolicy::default_for(OperationClass::Search)),
            scrape: PolicyConfig::from_policy(&CallPolicy::default_for(OperationClass::Scrape)),
            document_extract: PolicyConfig::from_policy(&CallPolicy::default_for(
                OperationClass::DocumentExtract,
            )),
            generation: PolicyConfig::from_policy(&CallPolicy::default_for(OperationClass::Generation)),
        }
    }
}

impl ResilienceConfig {
    pub fn policies(&self) -> PolicySet {
        PolicySet {
            search: self.search.to_policy(),
            scrape: self.scrape.to_policy(),
            document_extract: self.document_extract.to_policy(),
            generation: self.generation.to_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hard deadline for a whole run. Exceeding it is fatal.
    pub pipeline_timeout_secs: u64,
    pub intent_timeout_secs: u64,
    pub web_branch_timeout_secs: u64,
    pub document_branch_timeout_secs: u64,
    pub summarization_timeout_secs: u64,
    pub verification_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub quality_timeout_secs: u64,
    /// Upper bound on claims sent for fact-checking.
    pub max_claims_to_verify: usize,
    /// Keyword-overlap (Jaccard) at or above which two summaries share a group.
    pub similarity_threshold: f64,
    /// Claims this short or shorter are not fact-checked.
    pub min_claim_chars: usize,
    /// Outbound calls a stage keeps in flight at once.
    pub max_concurrent_calls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout_secs: 900,
            intent_timeout_secs: 60,
            web_branch_timeout_secs: 180,
            document_branch_timeout_secs: 300,
            summarization_timeout_secs: 300,
            verification_timeout_secs: 300,
            synthesis_timeout_secs: 180,
            quality_timeout_secs: 300,
            max_claims_to_verify: 10,
            similarity_threshold: 0.3,
            min_claim_chars: 20,
            max_concurrent_calls: 4,
        }
    }
}

impl PipelineConfig {
    fn timeouts(&self) -> [(&'static str, u64); 8] {
        [
            ("pipeline_timeout_secs", self.pipeline_timeout_secs),
            ("intent_timeout_secs", self.intent_timeout_secs),
            ("web_branch_timeout_secs", self.web_branch_timeout_secs),
            ("document_branch_timeout_secs", self.document_branch_timeout_secs),
            ("summarization_timeout_secs", self.summarization_timeout_secs),
            ("verification_timeout_secs", self.verification_timeout_secs),
            ("synthesis_timeout_secs", self.synthesis_timeout_secs),
            ("quality_timeout_secs", self.quality_timeout_secs),
        ]
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Intent => self.intent_timeout_secs,
            Stage::Gathering => self.web_branch_timeout_secs.max(self.document_branch_timeout_secs),
            Stage::Summarization => self.summarization_timeout_secs,
            Stage::Verification => self.verification_timeout_secs,
            Stage::Synthesis => self.synthesis_timeout_secs,
            Stage::Quality => self.quality_timeout_secs,
            Stage::Orchestrator => self.pipeline_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn web_branch_timeout(&self) -> Duration {
        Duration::from_secs(self.web_branch_timeout_secs)
    }

    pub fn document_branch_timeout(&self) -> Duration {
        Duration::from_secs(self.document_branch_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Where sessions are persisted. `None` keeps sessions in memory only.
    pub persist_dir: Option<PathBuf>,
    /// Active sessions older than this are eligible for eviction.
    pub max_session_age_secs: u64,
    pub persist_on_close: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persist_dir: None,
            max_session_age_secs: 3600,
            persist_on_close: true,
        }
    }
}

impl ConciergeConfig {
    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_query(&self.query)?;
        self.resilience.search.validate("search")?;
        self.resilience.scrape.validate("scrape")?;
        self.resilience.document_extract.validate("document_extract")?;
        self.resilience.generation.validate("generation")?;
        if self.pipeline.pipeline_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.pipeline_timeout_secs must be positive".into(),
            });
        }
        for (name, secs) in self.pipeline.timeouts() {
            check_bound(format!("pipeline.{name}"), secs, MAX_TIMEOUT_SECS)?;
        }
        if self.pipeline.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.max_concurrent_calls must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.pipeline.similarity_threshold) {
            return Err(ConfigError::Invalid {
                message: "pipeline.similarity_threshold must be within 0.0..=1.0".into(),
            });
        }
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "generation.model must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Validate the numeric settings carried by a query.
pub fn validate_query(config: &QueryConfig) -> Result<(), ConfigError> {
    if config.quality_target > 100 {
        return Err(ConfigError::Invalid {
            message: format!("quality target {} exceeds 100", config.quality_target),
        });
    }
    if config.max_iterations == 0 {
        return Err(ConfigError::Invalid {
            message: "max_iterations must be at least 1".into(),
        });
    }
    if config.max_sources == 0 {
        return Err(ConfigError::Invalid {
            message: "max_sources must be at least 1".into(),
        });
    }
    Ok(())
}

/// Load configuration with layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `CONCIERGE_`)
/// 3. Workspace-local config (`.concierge/config.toml`)
/// 4. User config (`~/.config/concierge/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConciergeConfig>,
) -> Result<ConciergeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ConciergeConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".concierge").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CONCIERGE_GENERATION__MODEL, CONCIERGE_QUERY__QUALITY_TARGET, etc.
    figment = figment.merge(Env::prefixed("CONCIERGE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "concierge", "concierge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Platform data directory, used for logs and persisted sessions.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "concierge", "concierge").map(|dirs| dirs.data_dir().to_path_buf())
}
