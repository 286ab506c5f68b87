//! Broker -> connector -> crawler wiring against the mock directory.

use std::sync::Arc;

use futures::TryStreamExt;
use oc_source::mock::{MockConnector, MockCredentialBroker, MockDirectory};
use oc_source::{CredentialBroker, DirectoryConnector, OrgTreeCrawler, RetryPolicy, SourceError};

fn directory() -> Arc<MockDirectory> {
    let directory = MockDirectory::new();
    directory.add_root("r-1");
    directory.add_unit("ou-eng", "r-1");
    directory.add_entry("100000000001", "ou-eng");
    directory.add_entry("100000000002", "r-1");
    Arc::new(directory)
}

#[tokio::test]
async fn test_each_assumption_yields_fresh_credentials() {
    let broker = MockCredentialBroker::new();
    let first = broker.assume().await.unwrap();
    let second = broker.assume().await.unwrap();

    assert_ne!(first.access_key_id, second.access_key_id);
    assert_eq!(broker.call_count(), 2);
}

#[tokio::test]
async fn test_crawl_through_connected_client() {
    let broker = MockCredentialBroker::new();
    let connector = MockConnector::new(directory());

    let credentials = broker.assume().await.unwrap();
    let client = connector.connect(&credentials).await.unwrap();
    let crawler = OrgTreeCrawler::new(client, RetryPolicy::none());

    let ids: Vec<String> = crawler.list_all_entries().try_collect().await.unwrap();
    assert_eq!(ids, vec!["100000000001", "100000000002"]);

    let entry = crawler.fetch_entry("100000000001").await.unwrap();
    assert_eq!(entry.ou_path, vec!["r-1", "ou-eng"]);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_rejected_exchange_is_authorization_error() {
    let broker = MockCredentialBroker::rejecting();
    let err = broker.assume().await.unwrap_err();
    assert!(err.is_authorization());
    assert!(matches!(err, SourceError::Authorization(_)));
}

#[tokio::test]
async fn test_unknown_entry_is_not_found() {
    let client = MockConnector::new(directory())
        .connect(&MockCredentialBroker::new().assume().await.unwrap())
        .await
        .unwrap();
    let crawler = OrgTreeCrawler::new(client, RetryPolicy::none());

    assert_eq!(
        crawler.fetch_entry("999").await.unwrap_err(),
        SourceError::NotFound("999".to_string())
    );
}
