// Rust Job Scraper Library
//
// Polite, concurrent scraping jobs: per-domain rate limiting with adaptive
// backoff, robots.txt compliance, rotating browser identities and CSS-selector
// field extraction.

pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod fetcher;
pub mod identity;
pub mod job;
pub mod rate_limit;
pub mod robots;
pub mod utils;

// Re-export main types for convenience
pub use config::{BackoffScope, EngineConfig};
pub use error::{RuleError, ScrapeError};
pub use executor::JobExecutor;
pub use extractor::{CompiledRules, Extraction, FieldExtractor};
pub use fetcher::{FetchStats, FetchedPage, PageFetcher};
pub use identity::{IdentityRotator, USER_AGENTS};
pub use job::{
    AttributeMode, CustomField, ExtractionRules, FieldRule, IdentityHint, JobConfig, JobId,
    JobSettings, JobStatus, PageOutcome, PageResult, ProgressSnapshot,
};
pub use rate_limit::RateLimiter;
pub use robots::{RiskLevel, RobotsPolicy, RobotsPolicyCache, RobotsVerdict};
pub use utils::{domain_of, validate_url};
