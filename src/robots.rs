use anyhow::{Context, Result};
use dashmap::DashMap;
use reqwest::StatusCode;
use robotstxt::DefaultMatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::config::EngineConfig;
use crate::utils::domain_of;

/// Identities probed, in order, when the requested one is disallowed.
pub const FALLBACK_IDENTITIES: &[&str] = &["Googlebot", "bingbot", "*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub reason: String,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_identity: Option<String>,
}

impl RobotsVerdict {
    fn new(
        allowed: bool,
        reason: impl Into<String>,
        risk_level: RiskLevel,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            allowed,
            reason: reason.into(),
            risk_level,
            recommendation: recommendation.into(),
            alternative_identity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsPolicy {
    /// Raw robots.txt body; an empty body allows everything
    Rules(String),
    /// The site answered 401/403 for robots.txt itself
    DenyAll,
    /// robots.txt could not be fetched at all
    Unavailable,
}

impl RobotsPolicy {
    pub fn allows(&self, identity: &str, url: &str) -> bool {
        match self {
            RobotsPolicy::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, product_token(identity), url)
            }
            RobotsPolicy::DenyAll => false,
            RobotsPolicy::Unavailable => true,
        }
    }
}

/// The name robots.txt groups are matched against: `Mozilla/5.0 (...)` becomes
/// `Mozilla`. `*` and identities without a leading token are kept as is.
pub fn product_token(identity: &str) -> &str {
    let identity = identity.trim();
    let end = identity
        .find(|c: char| !(c.is_ascii_alphabetic() || c == '_' || c == '-'))
        .unwrap_or(identity.len());
    if end == 0 { identity } else { &identity[..end] }
}

#[derive(Debug, Clone)]
pub struct RobotsCacheEntry {
    pub domain: String,
    pub policy: RobotsPolicy,
    pub fetched_at: Instant,
}

/// Fetches robots.txt once per domain and TTL window, and answers whether an
/// identity may crawl a URL.
pub struct RobotsPolicyCache {
    client: reqwest::Client,
    scheme: String,
    user_agent: String,
    ttl: Duration,
    entries: DashMap<String, Arc<Mutex<Option<RobotsCacheEntry>>>>,
    fetches: AtomicUsize,
}

impl RobotsPolicyCache {
    pub fn new(client: reqwest::Client, config: &EngineConfig) -> Self {
        Self {
            client,
            scheme: config.robots_scheme.clone(),
            user_agent: config.robots_user_agent.clone(),
            ttl: config.robots_ttl(),
            entries: DashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.robots_timeout())
            .build()
            .context("Failed to build robots.txt client")?;
        Ok(Self::new(client, config))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Number of robots.txt requests actually sent.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn evaluate(&self, url: &str, identity: &str, respect: bool) -> RobotsVerdict {
        if !respect {
            return RobotsVerdict::new(
                true,
                "robots.txt compliance disabled",
                RiskLevel::Medium,
                "Consider respecting robots.txt for ethical scraping",
            );
        }

        match self.check(url, identity).await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Error checking robots.txt for {}: {:#}", url, e);
                RobotsVerdict::new(
                    true,
                    format!("Error checking robots.txt: {}", e),
                    RiskLevel::Medium,
                    "Proceed with extra caution",
                )
            }
        }
    }

    async fn check(&self, url: &str, identity: &str) -> Result<RobotsVerdict> {
        let parsed = Url::parse(url).with_context(|| format!("Failed to parse URL {}", url))?;
        let domain = domain_of(&parsed).context("URL has no host")?;
        let policy = self.policy_for(&domain).await;

        if policy == RobotsPolicy::Unavailable {
            return Ok(RobotsVerdict::new(
                true,
                "robots.txt not found or inaccessible",
                RiskLevel::Low,
                "Proceed with caution and respect rate limits",
            ));
        }

        if policy.allows(identity, url) {
            return Ok(RobotsVerdict::new(
                true,
                "Allowed by robots.txt",
                RiskLevel::Low,
                "Proceed with normal scraping",
            ));
        }

        if let Some(alternative) = FALLBACK_IDENTITIES
            .iter()
            .find(|alt| policy.allows(alt, url))
        {
            let mut verdict = RobotsVerdict::new(
                false,
                format!("Blocked for {} but allowed for {}", identity, alternative),
                RiskLevel::High,
                format!(
                    "Consider using {} user agent or find alternative data source",
                    alternative
                ),
            );
            verdict.alternative_identity = Some(alternative.to_string());
            return Ok(verdict);
        }

        Ok(RobotsVerdict::new(
            false,
            "Blocked by robots.txt",
            RiskLevel::High,
            "Find alternative data source or contact website owner",
        ))
    }

    /// Cached policy for `domain`, refreshed when older than the TTL.
    ///
    /// The per-domain lock is held across the fetch so concurrent callers
    /// wait for the same request instead of issuing their own.
    async fn policy_for(&self, domain: &str) -> RobotsPolicy {
        let slot = self
            .entries
            .entry(domain.to_string())
            .or_default()
            .value()
            .clone();
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.policy.clone();
            }
        }

        let policy = self.fetch(domain).await;
        *entry = Some(RobotsCacheEntry {
            domain: domain.to_string(),
            policy: policy.clone(),
            fetched_at: Instant::now(),
        });
        policy
    }

    async fn fetch(&self, domain: &str) -> RobotsPolicy {
        let robots_url = format!("{}://{}/robots.txt", self.scheme, domain);
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let response = match self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to fetch robots.txt for {}: {}", domain, e);
                return RobotsPolicy::Unavailable;
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) => {
                    log::info!("Fetched robots.txt for {}", domain);
                    RobotsPolicy::Rules(body)
                }
                Err(e) => {
                    log::warn!("Failed to read robots.txt for {}: {}", domain, e);
                    RobotsPolicy::Unavailable
                }
            }
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::info!("robots.txt for {} is {}, treating site as disallowed", domain, status);
            RobotsPolicy::DenyAll
        } else {
            log::debug!("No robots.txt for {} ({})", domain, status);
            RobotsPolicy::Rules(String::new())
        }
    }
}
