use std::io::Write;
use tempfile::NamedTempFile;
use tidepool::config::load_config_with_hash;
use tidepool::source::{StoreSource, TaskSource};
use tidepool::storage::{share, FetchUpdate, PageStore, SqlitePageStore};
use tidepool::CrawlStatus;

#[test]
fn test_config_file_overrides_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[fetch]
job-name = "nightly"
worker-count = 4
max-retries = 1

[politeness]
crawl-delay-ms = 500

[output]
database-path = "./nightly.db"
store-content = false
"#
    )
    .unwrap();

    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    assert_eq!(config.fetch.job_name, "nightly");
    assert_eq!(config.fetch.worker_count, 4);
    assert_eq!(config.fetch.max_retries, 1);
    assert_eq!(config.politeness.crawl_delay_ms, 500);
    assert!(!config.output.store_content);
    assert_eq!(hash.len(), 64);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[fetch]\nworker-count = 0").unwrap();
    assert!(load_config_with_hash(file.path()).is_err());
}

#[tokio::test]
async fn test_store_source_orders_and_filters_pages() {
    let mut store = SqlitePageStore::new_in_memory().unwrap();
    let low = store.insert_or_get_page("http://a.com/low", "a.com", 0).unwrap();
    let high = store.insert_or_get_page("http://b.com/high", "b.com", 5).unwrap();
    let done = store.insert_or_get_page("http://a.com/done", "a.com", 9).unwrap();
    let worn = store.insert_or_get_page("http://c.com/worn", "c.com", 9).unwrap();

    store
        .update_fetch_result(done, &FetchUpdate::status(CrawlStatus::Fetched))
        .unwrap();
    for _ in 0..3 {
        store
            .update_fetch_result(worn, &FetchUpdate::status(CrawlStatus::Retry))
            .unwrap();
    }

    let store = share(store);
    let mut source = StoreSource::open(&store, 2).unwrap();
    assert_eq!(source.len(), 2);

    let batch = source.next_batch(10).await.unwrap();
    let pages: Vec<i64> = batch.iter().map(|entry| entry.page).collect();
    assert_eq!(pages, vec![high, low]);
    assert_eq!(batch[0].priority, 5);
    assert!(!source.has_more());
}
