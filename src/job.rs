use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{RuleError, ScrapeError};
use crate::extractor::CompiledRules;

pub type JobId = Uuid;

/// Longest accepted pause between two pages of a job, in seconds.
pub const MAX_JOB_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// Which browser a job should pretend to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityHint {
    #[default]
    Default,
    Chrome,
    Firefox,
    Safari,
    /// Draw a fresh identity from the rotator for every page
    Rotate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Seconds to wait between two pages of the same job (jitter is added on top)
    #[serde(default = "default_delay")]
    pub delay: f64,
    #[serde(default, alias = "identityHint", alias = "userAgent")]
    pub identity_hint: IdentityHint,
    #[serde(default = "default_true", alias = "respectRobots")]
    pub respect_robots: bool,
}

fn default_delay() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            delay: default_delay(),
            identity_hint: IdentityHint::Default,
            respect_robots: true,
        }
    }
}

/// How a matched element is turned into a field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum AttributeMode {
    /// Trimmed inner text
    #[default]
    Text,
    /// `href`, resolved against the page URL
    Href,
    /// `src`, resolved against the page URL
    Src,
    /// Any other attribute, returned verbatim
    Attr(String),
}

impl From<String> for AttributeMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => AttributeMode::Text,
            "href" => AttributeMode::Href,
            "src" => AttributeMode::Src,
            _ => AttributeMode::Attr(value),
        }
    }
}

impl From<AttributeMode> for String {
    fn from(mode: AttributeMode) -> Self {
        match mode {
            AttributeMode::Text => "text".to_string(),
            AttributeMode::Href => "href".to_string(),
            AttributeMode::Src => "src".to_string(),
            AttributeMode::Attr(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub selector: String,
    #[serde(default)]
    pub attribute: AttributeMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub attribute: AttributeMode,
}

/// Named field rules plus the free-form `custom` list, as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRules {
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<CustomField>,
}

/// A job submission record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: JobId,
    pub urls: Vec<String>,
    #[serde(default, alias = "scraping_rules")]
    pub rules: ExtractionRules,
    #[serde(default)]
    pub settings: JobSettings,
}

impl JobConfig {
    /// Check settings and the rule schema once, up front, instead of per page.
    pub fn validate(&self) -> Result<CompiledRules, RuleError> {
        let delay = self.settings.delay;
        if !(delay.is_finite() && (0.0..=MAX_JOB_DELAY_SECS).contains(&delay)) {
            return Err(RuleError::InvalidDelay {
                value: delay,
                max: MAX_JOB_DELAY_SECS,
            });
        }
        CompiledRules::compile(&self.rules)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Success,
    InvalidUrl,
    RobotsDisallowed,
    HttpError,
    RateLimited,
    RequestFailed,
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub data: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub outcome: PageOutcome,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub identity: Option<String>,
}

impl PageResult {
    pub fn failed(url: &str, err: &ScrapeError, identity: Option<String>) -> Self {
        Self {
            url: url.to_string(),
            data: HashMap::new(),
            timestamp: Utc::now(),
            success: false,
            error: Some(err.to_string()),
            outcome: err.outcome(),
            status_code: err.status_code(),
            response_time_ms: None,
            identity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub pages_scraped: usize,
    pub total_pages: usize,
    pub percentage: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub results: Vec<PageResult>,
}

impl ProgressSnapshot {
    pub fn new(job_id: JobId, total_pages: usize) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            pages_scraped: 0,
            total_pages,
            percentage: 0.0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: PageResult) {
        self.results.push(result);
        self.pages_scraped = self.results.len();
        self.percentage = if self.total_pages == 0 {
            100.0
        } else {
            self.pages_scraped as f64 / self.total_pages as f64 * 100.0
        };
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.end_time = Some(Utc::now());
        if self.total_pages == 0 {
            self.percentage = 100.0;
        }
    }

    pub fn fail(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(message);
    }

    pub fn failed_pages(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}
