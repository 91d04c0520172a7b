use url::Url;

use crate::error::ScrapeError;

/// Validate a raw target URL, adding `default_scheme` when none is given.
///
/// Empty input and URLs without a host are rejected.
pub fn validate_url(raw: &str, default_scheme: &str) -> Result<Url, ScrapeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScrapeError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("{}://{}", default_scheme, raw)
    };

    let url = Url::parse(&candidate).map_err(|e| {
        ScrapeError::InvalidUrl(format!("Invalid URL format: {} ({})", candidate, e))
    })?;

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ScrapeError::InvalidUrl(format!(
            "Invalid URL format: {}",
            candidate
        ))),
    }
}

/// Host plus explicit port, the key used for per-domain state.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
