use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use url::Url;

use crate::config::EngineConfig;
use crate::error::ScrapeError;
use crate::identity::IdentityRotator;
use crate::rate_limit::RateLimiter;
use crate::utils::domain_of;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchStats {
    pub requests_made: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub robots_blocked: u64,
    pub rate_limited: u64,
    pub success_rate: f64,
}

#[derive(Default)]
struct Counters {
    requests_made: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    robots_blocked: AtomicU64,
    rate_limited: AtomicU64,
}

/// Rate-limited GET with rotated browser headers; feeds outcomes back into
/// the rate limiter.
pub struct PageFetcher {
    client: reqwest::Client,
    identities: Arc<IdentityRotator>,
    rate_limiter: Arc<RateLimiter>,
    counters: Counters,
}

impl PageFetcher {
    pub fn new(
        config: &EngineConfig,
        identities: Arc<IdentityRotator>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            identities,
            rate_limiter,
            counters: Counters::default(),
        })
    }

    pub async fn fetch(&self, url: &Url, identity: &str) -> Result<FetchedPage, ScrapeError> {
        let domain = domain_of(url)
            .ok_or_else(|| ScrapeError::InvalidUrl(format!("Invalid URL format: {}", url)))?;

        self.rate_limiter.wait(&domain).await;

        let mut request = self.client.get(url.clone());
        for (name, value) in self.identities.headers_for(Some(identity)) {
            request = request.header(name, value);
        }

        self.counters.requests_made.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.rate_limiter.record_error(&domain, None);
                self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                log::error!("Error fetching {}: {}", url, e);
                return Err(ScrapeError::Request(e));
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            self.rate_limiter.record_error(&domain, Some(429));
            log::warn!("Rate limited: {}", url);
            return Err(ScrapeError::RateLimited);
        }
        if status.as_u16() >= 400 {
            self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
            self.rate_limiter.record_error(&domain, Some(status.as_u16()));
            return Err(ScrapeError::Http {
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.rate_limiter.record_error(&domain, None);
                self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
                return Err(ScrapeError::Request(e));
            }
        };

        self.rate_limiter.record_success(&domain);
        self.counters.successful_requests.fetch_add(1, Ordering::Relaxed);

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            headers,
            body,
            elapsed: started.elapsed(),
            identity: identity.to_string(),
        })
    }

    pub fn record_robots_block(&self) {
        self.counters.robots_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FetchStats {
        let requests_made = self.counters.requests_made.load(Ordering::Relaxed);
        let successful_requests = self.counters.successful_requests.load(Ordering::Relaxed);
        let success_rate = if requests_made > 0 {
            (successful_requests as f64 / requests_made as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };

        FetchStats {
            requests_made,
            successful_requests,
            failed_requests: self.counters.failed_requests.load(Ordering::Relaxed),
            robots_blocked: self.counters.robots_blocked.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            success_rate,
        }
    }
}
