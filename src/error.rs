use thiserror::Error;

use crate::job::PageOutcome;

/// Everything that can go wrong while a job is scraping.
///
/// Variants are split by containment: page-level errors are recorded on the
/// page's result and the job moves on, everything else ends the job.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {status}")]
    Http { status: u16 },

    #[error("Rate limited: HTTP 429")]
    RateLimited,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Blocked by robots.txt: {reason}")]
    RobotsDisallowed {
        reason: String,
        alternative_identity: Option<String>,
    },

    #[error(
        "No data extracted - check your CSS selectors. Document contains {element_count} elements"
    )]
    NoData { element_count: usize },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Invalid job configuration: {0}")]
    Rules(#[from] RuleError),

    #[error("Internal fault: {0}")]
    Internal(String),
}

impl ScrapeError {
    /// Page-level errors never abort a job.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            ScrapeError::InvalidUrl(_)
                | ScrapeError::Http { .. }
                | ScrapeError::RateLimited
                | ScrapeError::Request(_)
                | ScrapeError::RobotsDisallowed { .. }
                | ScrapeError::NoData { .. }
        )
    }

    pub fn outcome(&self) -> PageOutcome {
        match self {
            ScrapeError::InvalidUrl(_) => PageOutcome::InvalidUrl,
            ScrapeError::Http { .. } => PageOutcome::HttpError,
            ScrapeError::RateLimited => PageOutcome::RateLimited,
            ScrapeError::RobotsDisallowed { .. } => PageOutcome::RobotsDisallowed,
            ScrapeError::NoData { .. } => PageOutcome::NoData,
            _ => PageOutcome::RequestFailed,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ScrapeError::Http { status } => Some(*status),
            ScrapeError::RateLimited => Some(429),
            ScrapeError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Problems found while validating a job's rules and settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("field name must not be empty")]
    EmptyName,

    #[error("field '{0}' has an empty selector")]
    EmptySelector(String),

    #[error("field '{field}' has an invalid selector '{selector}': {message}")]
    InvalidSelector {
        field: String,
        selector: String,
        message: String,
    },

    #[error("field '{0}' is defined more than once")]
    DuplicateField(String),

    #[error("delay must be between 0 and {max} seconds, got {value}")]
    InvalidDelay { value: f64, max: f64 },
}
