use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::config::{BackoffScope, EngineConfig};

const GLOBAL_KEY: &str = "*";
const MAX_MULTIPLIER: f64 = 10.0;

/// Per-domain bookkeeping; the error count lives next to it in `errors`.
#[derive(Debug, Default)]
pub struct DomainRateState {
    pub last_access: Option<Instant>,
}

/// Adaptive rate limiter for polite scraping.
///
/// Every request to a domain waits a random delay between `min_delay` and
/// `max_delay` since the previous one, scaled up after consecutive errors.
/// Each domain has its own async mutex, held across the wait, so concurrent
/// jobs hitting the same domain are serialized.
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    scope: BackoffScope,
    domains: DashMap<String, Arc<Mutex<DomainRateState>>>,
    errors: DashMap<String, u32>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, max_delay: Duration, scope: BackoffScope) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            scope,
            domains: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_secs_f64(config.min_delay_secs),
            Duration::from_secs_f64(config.max_delay_secs),
            config.backoff_scope,
        )
    }

    /// Suspend until `domain` may be hit again. Returns the time slept.
    pub async fn wait(&self, domain: &str) -> Duration {
        let slot = self
            .domains
            .entry(domain.to_string())
            .or_default()
            .value()
            .clone();
        let mut state = slot.lock().await;

        let mut base = self.random_base();
        let errors = self.consecutive_errors(domain);
        if errors > 0 {
            base = base.mul_f64(Self::backoff_multiplier(errors));
            log::warn!(
                "Increased delay to {:.2}s due to {} consecutive errors",
                base.as_secs_f64(),
                errors
            );
        }

        let mut slept = Duration::ZERO;
        if let Some(last) = state.last_access {
            let elapsed = last.elapsed();
            if elapsed < base {
                slept = base - elapsed;
                log::debug!(
                    "Rate limiting: sleeping {:.2}s for domain {}",
                    slept.as_secs_f64(),
                    domain
                );
                sleep(slept).await;
            }
        }

        state.last_access = Some(Instant::now());
        slept
    }

    pub fn record_success(&self, domain: &str) {
        self.errors.insert(self.error_key(domain).to_string(), 0);
    }

    /// A 429 counts three times as much as any other error.
    pub fn record_error(&self, domain: &str, status_code: Option<u16>) -> u32 {
        let increment = if status_code == Some(429) { 3 } else { 1 };
        let mut count = self
            .errors
            .entry(self.error_key(domain).to_string())
            .or_insert(0);
        *count += increment;
        let total = *count;
        drop(count);

        log::warn!(
            "Recorded error (status: {:?}), consecutive errors: {}",
            status_code,
            total
        );
        total
    }

    pub fn consecutive_errors(&self, domain: &str) -> u32 {
        self.errors
            .get(self.error_key(domain))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// `min(2^errors, 10)`
    pub fn backoff_multiplier(errors: u32) -> f64 {
        if errors == 0 {
            return 1.0;
        }
        2f64.powi(errors.min(16) as i32).min(MAX_MULTIPLIER)
    }

    fn random_base(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let secs = rand::rng()
            .random_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn error_key<'a>(&self, domain: &'a str) -> &'a str {
        match self.scope {
            BackoffScope::Global => GLOBAL_KEY,
            BackoffScope::PerDomain => domain,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
