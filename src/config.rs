use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which requests an error counts against when escalating backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffScope {
    /// One counter for every domain: an error anywhere slows everything down.
    #[default]
    Global,
    PerDomain,
}

/// Engine-wide settings shared by every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lower bound of the randomized per-domain delay, in seconds
    pub min_delay_secs: f64,
    /// Upper bound of the randomized per-domain delay, in seconds
    pub max_delay_secs: f64,
    /// Upper bound of the random jitter added to each job's inter-request delay
    pub max_jitter_secs: f64,
    pub request_timeout_secs: u64,
    pub robots_ttl_secs: u64,
    pub robots_timeout_secs: u64,
    /// Scheme used to build `{scheme}://{domain}/robots.txt`
    pub robots_scheme: String,
    /// User agent sent when fetching robots.txt itself
    pub robots_user_agent: String,
    /// Scheme prepended to target URLs that have none
    pub default_scheme: String,
    pub backoff_scope: BackoffScope,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 1.0,
            max_delay_secs: 5.0,
            max_jitter_secs: 1.0,
            request_timeout_secs: 30,
            robots_ttl_secs: 3600,
            robots_timeout_secs: 10,
            robots_scheme: "https".to_string(),
            robots_user_agent: concat!("rust-job-scraper/", env!("CARGO_PKG_VERSION")).to_string(),
            default_scheme: "https".to_string(),
            backoff_scope: BackoffScope::Global,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_delay_secs >= 0.0 && self.min_delay_secs.is_finite()) {
            anyhow::bail!("min_delay_secs must be a non-negative number");
        }
        if !(self.max_delay_secs >= self.min_delay_secs && self.max_delay_secs.is_finite()) {
            anyhow::bail!("max_delay_secs must be >= min_delay_secs");
        }
        if !(self.max_jitter_secs >= 0.0 && self.max_jitter_secs.is_finite()) {
            anyhow::bail!("max_jitter_secs must be a non-negative number");
        }
        if self.request_timeout_secs == 0 || self.robots_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        for (name, scheme) in [
            ("robots_scheme", &self.robots_scheme),
            ("default_scheme", &self.default_scheme),
        ] {
            if scheme != "http" && scheme != "https" {
                anyhow::bail!("{} must be \"http\" or \"https\", got {:?}", name, scheme);
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_secs)
    }

    pub fn robots_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_timeout_secs)
    }
}
