use std::sync::Arc;
use std::time::Duration;

use rust_job_scraper::{
    BackoffScope, EngineConfig, IdentityRotator, PageFetcher, RateLimiter, ScrapeError,
};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

fn fetcher() -> (PageFetcher, Arc<RateLimiter>) {
    let limiter = Arc::new(RateLimiter::new(Duration::ZERO, Duration::ZERO, BackoffScope::Global));
    let fetcher = PageFetcher::new(
        &EngineConfig::default(),
        Arc::new(IdentityRotator::new()),
        Arc::clone(&limiter),
    )
    .unwrap();
    (fetcher, limiter)
}

fn url(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_identity_and_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(header("user-agent", AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Jobs</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, _) = fetcher();
    let page = fetcher.fetch(&url(&server, "/jobs"), AGENT).await.unwrap();

    assert_eq!(page.status, 200);
    assert_eq!(page.body, "<h1>Jobs</h1>");
    assert_eq!(page.identity, AGENT);

    let stats = fetcher.stats();
    assert_eq!(stats.requests_made, 1);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn test_rate_limited_response_counts_triple() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (fetcher, limiter) = fetcher();
    let err = fetcher.fetch(&url(&server, "/jobs"), AGENT).await.unwrap_err();

    assert!(matches!(err, ScrapeError::RateLimited));
    assert_eq!(limiter.consecutive_errors("anything"), 3);
    assert_eq!(fetcher.stats().rate_limited, 1);
}

#[tokio::test]
async fn test_http_error_then_success_resets_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let (fetcher, limiter) = fetcher();
    let err = fetcher.fetch(&url(&server, "/broken"), AGENT).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Http { status: 500 }));
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(limiter.consecutive_errors("127.0.0.1"), 1);

    fetcher.fetch(&url(&server, "/ok"), AGENT).await.unwrap();
    assert_eq!(limiter.consecutive_errors("127.0.0.1"), 0);

    let stats = fetcher.stats();
    assert_eq!(stats.requests_made, 2);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.success_rate, 50.0);
}

#[tokio::test]
async fn test_connection_failure_is_request_error() {
    let (fetcher, limiter) = fetcher();
    let target = Url::parse("http://127.0.0.1:1/jobs").unwrap();

    let err = fetcher.fetch(&target, AGENT).await.unwrap_err();

    assert!(matches!(err, ScrapeError::Request(_)));
    assert!(err.is_page_level());
    assert_eq!(limiter.consecutive_errors("127.0.0.1:1"), 1);
}
