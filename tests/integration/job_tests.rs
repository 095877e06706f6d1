use std::sync::Arc;
use std::time::Duration;
use tidepool::config::FetchConfig;
use tidepool::output::load_statistics;
use tidepool::protocol::HttpProtocol;
use tidepool::source::StoreSource;
use tidepool::storage::{share, PageStore, SharedStore, SqlitePageStore};
use tidepool::url::parse_with_host;
use tidepool::{CrawlStatus, FetchOrchestrator, JobState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a configuration that lets a small job finish within seconds
fn create_test_config() -> FetchConfig {
    let mut config = FetchConfig::default();
    config.fetch.job_name = "it".to_string();
    config.fetch.worker_count = 3;
    config.fetch.pool_threads = 10;
    config.fetch.check_interval_secs = 1;
    config.fetch.idle_sleep_ms = 10;
    config.fetch.shutdown_timeout_secs = 1;
    config.politeness.crawl_delay_ms = 0;
    config.http.timeout_secs = 5;
    config
}

fn add_pages(store: &SharedStore, urls: &[String]) -> Vec<i64> {
    let mut store = store.lock().unwrap();
    urls.iter()
        .map(|url| {
            let (parsed, host) = parse_with_host(url).unwrap();
            store.insert_or_get_page(parsed.as_str(), &host, 0).unwrap()
        })
        .collect()
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn run_job(config: &FetchConfig, store: &SharedStore) -> tidepool::JobReport {
    let source = StoreSource::open(store, config.fetch.max_retries).unwrap();
    let protocol = HttpProtocol::new(&config.http).unwrap();
    let orchestrator = FetchOrchestrator::new(config, store.clone(), Arc::new(protocol));

    tokio::time::timeout(Duration::from_secs(30), orchestrator.run(Box::new(source)))
        .await
        .expect("job did not finish")
}

#[tokio::test]
async fn test_job_records_every_outcome() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount(
        &server,
        "/ok",
        ResponseTemplate::new(200).set_body_raw("<html><body>hello</body></html>", "text/html"),
    )
    .await;
    mount(&server, "/missing", ResponseTemplate::new(404)).await;
    mount(
        &server,
        "/old",
        ResponseTemplate::new(301).insert_header("location", "/new"),
    )
    .await;
    mount(&server, "/busy", ResponseTemplate::new(503)).await;

    let config = create_test_config();
    let mut inner = SqlitePageStore::new_in_memory().unwrap();
    let _ = inner.create_run("test").unwrap();
    let store = share(inner);

    let urls: Vec<String> = ["/ok", "/missing", "/old", "/busy"]
        .iter()
        .map(|p| format!("{}{}", base, p))
        .collect();
    let ids = add_pages(&store, &urls);

    let report = run_job(&config, &store).await;

    assert_eq!(report.end_state, JobState::MissionComplete);
    assert_eq!(report.feeder.fed, 4);
    assert_eq!(report.served(), 4);
    assert_eq!(report.counts.remaining(), 0);
    assert_eq!(report.pages, 1);

    let store = store.lock().unwrap();

    let ok = store.get_page(ids[0]).unwrap();
    assert_eq!(ok.crawl_status, CrawlStatus::Fetched);
    assert_eq!(ok.status_code, Some(200));
    assert_eq!(ok.content_type.as_deref(), Some("text/html"));
    assert_eq!(ok.content_length, Some(31));

    let missing = store.get_page(ids[1]).unwrap();
    assert_eq!(missing.crawl_status, CrawlStatus::Gone);
    assert_eq!(missing.status_code, Some(404));

    let old = store.get_page(ids[2]).unwrap();
    assert_eq!(old.crawl_status, CrawlStatus::RedirPerm);
    assert_eq!(old.repr_url.as_deref(), Some(format!("{}/new", base).as_str()));

    let busy = store.get_page(ids[3]).unwrap();
    assert_eq!(busy.crawl_status, CrawlStatus::Retry);
    assert_eq!(busy.retry_count, 1);

    let stats = load_statistics(&*store).unwrap();
    assert_eq!(stats.total_pages, 4);
    assert_eq!(stats.count(CrawlStatus::Fetched), 1);
    assert_eq!(stats.fetchable(), 1);
}

#[tokio::test]
async fn test_second_job_retries_failed_pages() {
    let server = MockServer::start().await;
    let base = server.uri();

    // The first request fails, every later one succeeds
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, "/flaky", ResponseTemplate::new(200).set_body_string("back")).await;
    mount(&server, "/done", ResponseTemplate::new(200).set_body_string("done")).await;

    let config = create_test_config();
    let store = share(SqlitePageStore::new_in_memory().unwrap());
    let ids = add_pages(&store, &[format!("{}/flaky", base), format!("{}/done", base)]);

    let first = run_job(&config, &store).await;
    assert_eq!(first.end_state, JobState::MissionComplete);
    assert_eq!(
        store.lock().unwrap().get_page(ids[0]).unwrap().crawl_status,
        CrawlStatus::Retry
    );

    // Only the retry page is fetchable the second time around
    let second = run_job(&config, &store).await;
    assert_eq!(second.end_state, JobState::MissionComplete);
    assert_eq!(second.feeder.fed, 1);
    assert_eq!(second.pages, 1);

    let store = store.lock().unwrap();
    assert_eq!(store.get_page(ids[0]).unwrap().crawl_status, CrawlStatus::Fetched);
    assert_eq!(store.get_page(ids[1]).unwrap().crawl_status, CrawlStatus::Fetched);
}

#[tokio::test]
async fn test_halted_job_stops_feeding() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.fetch.worker_count = 1;
    config.fetch.pool_threads = 1;

    let store = share(SqlitePageStore::new_in_memory().unwrap());
    let urls: Vec<String> = (0..50).map(|i| format!("{}/p{}", base, i)).collect();
    add_pages(&store, &urls);

    let source = StoreSource::open(&store, config.fetch.max_retries).unwrap();
    let protocol = HttpProtocol::new(&config.http).unwrap();
    let orchestrator = FetchOrchestrator::new(&config, store.clone(), Arc::new(protocol));

    let halt = orchestrator.halt_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        halt.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(30), orchestrator.run(Box::new(source)))
        .await
        .expect("job did not halt");

    assert_eq!(report.end_state, JobState::Halting);
    assert!(report.served() < 50);
    assert!(report.feeder.discarded > 0);

    // Unserved pages stay fetchable for the next job
    let remaining = StoreSource::open(&store, config.fetch.max_retries).unwrap();
    assert_eq!(remaining.len(), 50 - report.pages as usize);
}
