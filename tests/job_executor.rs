use std::time::{Duration, Instant};

use rust_job_scraper::{EngineConfig, JobConfig, JobExecutor, JobStatus, PageOutcome};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"
    <html>
        <body>
            <h1>Senior Rust Engineer</h1>
            <a class="apply" href="/apply/42">Apply</a>
        </body>
    </html>
"#;

fn engine() -> EngineConfig {
    EngineConfig {
        min_delay_secs: 0.0,
        max_delay_secs: 0.0,
        max_jitter_secs: 0.0,
        robots_scheme: "http".to_string(),
        default_scheme: "http".to_string(),
        ..EngineConfig::default()
    }
}

fn job(urls: Vec<String>, settings: serde_json::Value) -> JobConfig {
    serde_json::from_value(json!({
        "urls": urls,
        "rules": {
            "title": {"selector": "h1", "attribute": "text"},
            "apply": {"selector": "a.apply", "attribute": "href"}
        },
        "settings": settings
    }))
    .unwrap()
}

/// `host:port/route`, without a scheme.
fn target(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.address(), route)
}

async fn serve_page(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

async fn wait_for_pages(executor: &JobExecutor, id: Uuid, pages: usize) {
    for _ in 0..200 {
        if executor.progress(id).is_some_and(|p| p.pages_scraped >= pages) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} never reached {} pages", id, pages);
}

#[tokio::test]
async fn test_job_completes_with_extracted_fields() {
    let server = MockServer::start().await;
    serve_page(&server, "/jobs/1", 200, LISTING).await;
    serve_page(&server, "/jobs/2", 200, LISTING).await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    let config = job(
        vec![target(&server, "/jobs/1"), target(&server, "/jobs/2")],
        json!({"delay": 0}),
    );

    assert!(executor.start(id, config));
    assert_eq!(executor.wait(id).await, Some(JobStatus::Completed));

    let progress = executor.progress(id).unwrap();
    assert_eq!(progress.pages_scraped, 2);
    assert_eq!(progress.total_pages, 2);
    assert_eq!(progress.percentage, 100.0);
    assert!(progress.end_time.is_some());

    for result in &progress.results {
        assert!(result.success);
        assert_eq!(result.outcome, PageOutcome::Success);
        assert_eq!(result.status_code, Some(200));
        assert!(result.identity.is_some());
        assert_eq!(result.data["title"], "Senior Rust Engineer");
        assert_eq!(result.data["apply"], format!("{}/apply/42", server.uri()));
    }
    assert!(!executor.is_running(id));
    assert_eq!(executor.stats().successful_requests, 2);
}

#[tokio::test]
async fn test_page_failures_do_not_stop_the_job() {
    let server = MockServer::start().await;
    serve_page(&server, "/ok", 200, LISTING).await;
    serve_page(&server, "/gone", 404, "").await;
    serve_page(&server, "/empty", 200, "<html><body><p>nothing here</p></body></html>").await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    let config = job(
        vec![
            String::new(),
            target(&server, "/gone"),
            target(&server, "/empty"),
            target(&server, "/ok"),
        ],
        json!({"delay": 0}),
    );

    assert!(executor.start(id, config));
    assert_eq!(executor.wait(id).await, Some(JobStatus::Completed));

    let progress = executor.progress(id).unwrap();
    assert_eq!(progress.pages_scraped, 4);
    assert_eq!(progress.percentage, 100.0);
    assert_eq!(progress.failed_pages(), 3);

    let results = &progress.results;
    assert_eq!(results[0].outcome, PageOutcome::InvalidUrl);
    assert!(results[0].error.as_deref().unwrap().contains("Invalid URL"));

    assert_eq!(results[1].outcome, PageOutcome::HttpError);
    assert_eq!(results[1].status_code, Some(404));

    assert_eq!(results[2].outcome, PageOutcome::NoData);
    assert!(results[2].error.as_deref().unwrap().contains("No data extracted"));
    assert_eq!(results[2].data["title"], "");

    assert!(results[3].success);
}

#[tokio::test]
async fn test_robots_disallowed_page_is_skipped() {
    let server = MockServer::start().await;
    serve_page(&server, "/robots.txt", 200, "User-agent: *\nDisallow: /private\n").await;
    serve_page(&server, "/public", 200, LISTING).await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(0)
        .mount(&server)
        .await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    let config = job(
        vec![target(&server, "/private"), target(&server, "/public")],
        json!({"delay": 0}),
    );

    assert!(executor.start(id, config));
    assert_eq!(executor.wait(id).await, Some(JobStatus::Completed));

    let progress = executor.progress(id).unwrap();
    assert_eq!(progress.results[0].outcome, PageOutcome::RobotsDisallowed);
    assert!(progress.results[0].error.as_deref().unwrap().contains("robots.txt"));
    assert!(progress.results[1].success);
    assert_eq!(executor.stats().robots_blocked, 1);
}

#[tokio::test]
async fn test_robots_ignored_when_disabled() {
    let server = MockServer::start().await;
    serve_page(&server, "/robots.txt", 200, "User-agent: *\nDisallow: /\n").await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(1)
        .mount(&server)
        .await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    let config = job(
        vec![target(&server, "/private")],
        json!({"delay": 0, "respect_robots": false, "identity_hint": "rotate"}),
    );

    assert!(executor.start(id, config));
    assert_eq!(executor.wait(id).await, Some(JobStatus::Completed));
    assert!(executor.progress(id).unwrap().results[0].success);
}

#[tokio::test]
async fn test_duplicate_start_is_refused_and_stop_pauses() {
    let server = MockServer::start().await;
    serve_page(&server, "/jobs/1", 200, LISTING).await;
    serve_page(&server, "/jobs/2", 200, LISTING).await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    let urls = vec![target(&server, "/jobs/1"), target(&server, "/jobs/2")];

    assert!(executor.start(id, job(urls.clone(), json!({"delay": 30}))));
    assert!(!executor.start(id, job(urls.clone(), json!({"delay": 0}))));
    assert!(executor.is_running(id));

    // first page done, now sleeping before the second
    wait_for_pages(&executor, id, 1).await;

    assert!(executor.stop(id).await);
    assert_eq!(executor.status(id), Some(JobStatus::Paused));
    assert!(!executor.is_running(id));
    assert!(!executor.stop(id).await);

    let progress = executor.progress(id).unwrap();
    assert_eq!(progress.pages_scraped, 1);
    assert_eq!(progress.percentage, 50.0);

    // a stopped job may be started again from scratch
    assert!(executor.start(id, job(urls, json!({"delay": 0}))));
    assert_eq!(executor.wait(id).await, Some(JobStatus::Completed));
    assert_eq!(executor.progress(id).unwrap().pages_scraped, 2);
}

#[tokio::test]
async fn test_stop_interrupts_in_flight_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(LISTING)
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();
    assert!(executor.start(id, job(vec![target(&server, "/slow")], json!({"delay": 0}))));

    // wait until the page request has reached the server
    let mut in_flight = false;
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.iter().any(|r| r.url.path() == "/slow") {
            in_flight = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(in_flight);

    let started = Instant::now();
    assert!(executor.stop(id).await);
    assert!(started.elapsed() < Duration::from_secs(5), "stop took {:?}", started.elapsed());

    assert_eq!(executor.status(id), Some(JobStatus::Paused));
    assert!(!executor.is_running(id));
    let progress = executor.progress(id).unwrap();
    assert_eq!(progress.pages_scraped, 0);
    assert!(progress.results.is_empty());
}

#[tokio::test]
async fn test_stop_all_pauses_every_running_job() {
    let server = MockServer::start().await;
    serve_page(&server, "/a", 200, LISTING).await;

    let executor = JobExecutor::new(engine()).unwrap();
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        let urls = vec![target(&server, "/a"), target(&server, "/a")];
        assert!(executor.start(*id, job(urls, json!({"delay": 30}))));
    }

    assert_eq!(executor.stop_all().await, 3);
    for id in &ids {
        assert_eq!(executor.status(*id), Some(JobStatus::Paused));
        assert!(!executor.is_running(*id));
    }
}

#[tokio::test]
async fn test_unknown_job_queries() {
    let executor = JobExecutor::new(engine()).unwrap();
    let id = Uuid::new_v4();

    assert!(!executor.stop(id).await);
    assert_eq!(executor.status(id), None);
    assert!(executor.progress(id).is_none());
    assert!(!executor.is_running(id));
}
