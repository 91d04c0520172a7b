use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::job::IdentityHint;

/// User agent rotation for avoiding detection
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.2; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 OPR/107.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

const CHROME_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
const FIREFOX_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0";
const SAFARI_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const MAX_HISTORY: usize = 50;
const RECENT_WINDOW: usize = 10;
const MAX_ATTEMPTS: usize = 10;

/// Issues user agents while avoiding the ones handed out most recently.
pub struct IdentityRotator {
    pool: Vec<String>,
    history: Mutex<VecDeque<String>>,
}

impl IdentityRotator {
    pub fn new() -> Self {
        Self::with_pool(USER_AGENTS.iter().map(|s| s.to_string()).collect())
    }

    /// An empty pool falls back to the built-in list.
    pub fn with_pool(pool: Vec<String>) -> Self {
        let pool = if pool.is_empty() {
            USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            pool
        };
        Self {
            pool,
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY + 1)),
        }
    }

    pub fn next(&self) -> String {
        let mut rng = rand::rng();
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());

        let recent_start = history.len().saturating_sub(RECENT_WINDOW);
        let mut chosen = None;
        for _ in 0..MAX_ATTEMPTS {
            let candidate = self.draw(&mut rng);
            if !history.range(recent_start..).any(|used| used == candidate) {
                chosen = Some(candidate.to_string());
                break;
            }
        }
        let agent = chosen.unwrap_or_else(|| self.draw(&mut rng).to_string());

        history.push_back(agent.clone());
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
        agent
    }

    /// Fixed identity for a browser hint, or a rotated one for `Rotate`.
    pub fn identity_for(&self, hint: IdentityHint) -> String {
        match hint {
            IdentityHint::Default | IdentityHint::Chrome => CHROME_AGENT.to_string(),
            IdentityHint::Firefox => FIREFOX_AGENT.to_string(),
            IdentityHint::Safari => SAFARI_AGENT.to_string(),
            IdentityHint::Rotate => self.next(),
        }
    }

    /// Realistic browser headers for `identity` (a fresh one when `None`).
    pub fn headers_for(&self, identity: Option<&str>) -> BTreeMap<&'static str, String> {
        let identity = match identity {
            Some(agent) => agent.to_string(),
            None => self.next(),
        };

        let mut headers = BTreeMap::new();
        headers.insert("User-Agent", identity);
        headers.insert("Accept", ACCEPT.to_string());
        headers.insert("Accept-Language", "en-US,en;q=0.5".to_string());
        headers.insert("Accept-Encoding", "gzip, deflate".to_string());
        headers.insert("DNT", "1".to_string());
        headers.insert("Connection", "keep-alive".to_string());
        headers.insert("Upgrade-Insecure-Requests", "1".to_string());
        headers.insert("Sec-Fetch-Dest", "document".to_string());
        headers.insert("Sec-Fetch-Mode", "navigate".to_string());
        headers.insert("Sec-Fetch-Site", "none".to_string());
        headers.insert("Cache-Control", "max-age=0".to_string());

        let mut rng = rand::rng();
        if rng.random_bool(0.3) {
            headers.insert("Referer", "https://www.google.com/".to_string());
        }
        if rng.random_bool(0.2) {
            let octets: Vec<String> = (0..4)
                .map(|_| rng.random_range(1..=255u8).to_string())
                .collect();
            headers.insert("X-Forwarded-For", octets.join("."));
        }

        headers
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    fn draw<'a>(&'a self, rng: &mut impl Rng) -> &'a str {
        // pool is never empty, see with_pool
        self.pool.choose(rng).map(String::as_str).unwrap_or(CHROME_AGENT)
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        Self::new()
    }
}
