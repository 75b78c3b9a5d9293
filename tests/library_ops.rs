//! Purpose: Library-scoped operations outside the per-kind object sets.
//! Exports: None (integration test module).
//! Role: Validate tags, settings, full-text, library version, and root calls end to end.
//! Invariants: Runs against the in-memory server in `common`.
//! Invariants: Every conditioned write is checked for 428, 412, and the version actually sent.

mod common;

use common::{API_KEY, FakeServer, client_for, root_client_for};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use zapi::api::{
    ErrorKind, FullTextContent, ItemData, ObjectKey, ObjectKind, Precondition, SettingValue,
};
use zapi::core::request::IF_UNMODIFIED_SINCE_VERSION;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn sent_body(server: &FakeServer) -> TestResult<Value> {
    let sent = server.last_request().ok_or("no request")?;
    Ok(serde_json::from_str(sent.body.as_deref().unwrap_or("null"))?)
}

fn sent_header(server: &FakeServer) -> Option<String> {
    server
        .last_request()
        .and_then(|sent| sent.header(IF_UNMODIFIED_SINCE_VERSION).map(str::to_string))
}

#[tokio::test]
async fn library_version_follows_writes() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    assert_eq!(library.version().await?, 0);

    library
        .items()
        .create_many(&[ItemData::new("book").with_title("A")])
        .await?;
    assert_eq!(library.version().await?, server.library_version());
    assert_eq!(server.library_version(), 1);
    Ok(())
}

#[tokio::test]
async fn tags_are_listed_with_item_counts() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    library
        .items()
        .create_many(&[
            ItemData::new("book").with_tag("alpha").with_tag("beta"),
            ItemData::new("book").with_tag("alpha"),
        ])
        .await?;

    let tags = library.tags(&Default::default()).await?;
    let counts: Vec<(&str, u64)> = tags
        .iter()
        .map(|entry| (entry.tag.as_str(), entry.meta.num_items))
        .collect();
    assert_eq!(counts, vec![("alpha", 2), ("beta", 1)]);
    Ok(())
}

#[tokio::test]
async fn tag_deletion_is_conditioned_on_library_version() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    library
        .items()
        .create_many(&[ItemData::new("book").with_tag("alpha").with_tag("beta")])
        .await?;
    let current = server.library_version();

    let err = library
        .delete_tags(&["alpha"], Precondition::None)
        .await
        .expect_err("needs version");
    assert_eq!(err.kind(), ErrorKind::PreconditionRequired);

    let err = library
        .delete_tags(&["alpha"], Precondition::Header(current - 1))
        .await
        .expect_err("stale");
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(err.library_version(), Some(current));

    let ack = library
        .delete_tags(&["alpha"], Precondition::Property(current))
        .await?;
    assert_eq!(ack.status, 204);
    assert_eq!(sent_header(&server), Some(current.to_string()));
    assert_eq!(ack.library_version, Some(current + 1));

    let remaining = library.tags(&Default::default()).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].tag, "beta");
    let log = library.deleted(current).await?;
    assert!(log.contains(ObjectKind::Tag, "alpha"));
    Ok(())
}

#[tokio::test]
async fn single_setting_write_law() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    let colors = || SettingValue::new(json!([{"name": "red", "color": "#ff0000"}]));

    let err = library
        .put_setting("tagColors", colors(), Precondition::None)
        .await
        .expect_err("needs version");
    assert_eq!(err.kind(), ErrorKind::PreconditionRequired);

    library
        .put_setting("tagColors", colors(), Precondition::Property(0))
        .await?;
    assert_eq!(sent_body(&server)?["version"], json!(0));
    assert_eq!(sent_header(&server), None);

    let stored = library.setting("tagColors").await?;
    assert_eq!(stored.version, Some(server.library_version()));
    assert_eq!(stored.value[0]["name"], json!("red"));

    let err = library
        .put_setting("tagColors", colors(), Precondition::Property(0))
        .await
        .expect_err("already exists");
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let current = server.library_version();
    library
        .put_setting("tagColors", colors(), Precondition::Header(current))
        .await?;
    assert_eq!(sent_header(&server), Some(current.to_string()));
    assert_eq!(library.setting("tagColors").await?.version, Some(current + 1));
    Ok(())
}

#[tokio::test]
async fn batch_settings_write_carries_the_expected_version() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    let mut values = BTreeMap::new();
    values.insert("feeds".to_string(), SettingValue::new(json!({})));

    library
        .put_settings(&values, Precondition::Property(0))
        .await?;
    assert_eq!(sent_body(&server)?["feeds"]["version"], json!(0));
    assert!(values["feeds"].version.is_none());

    let err = library
        .put_settings(&values, Precondition::Property(0))
        .await
        .expect_err("already exists");
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let err = library
        .put_settings(&values, Precondition::None)
        .await
        .expect_err("needs version");
    assert_eq!(err.kind(), ErrorKind::PreconditionRequired);

    let current = server.library_version();
    library
        .put_settings(&values, Precondition::Header(current))
        .await?;
    assert_eq!(sent_header(&server), Some(current.to_string()));

    let all = library.settings().await?;
    assert_eq!(all["feeds"].version, Some(current + 1));
    Ok(())
}

#[tokio::test]
async fn setting_deletion_uses_header_form() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    library
        .put_setting("feeds", SettingValue::new(json!({})), Precondition::Property(0))
        .await?;
    let version = server.library_version();

    let err = library
        .delete_setting("feeds", Precondition::Property(version - 1))
        .await
        .expect_err("stale");
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(sent_header(&server), Some((version - 1).to_string()));

    library
        .delete_setting("feeds", Precondition::Property(version))
        .await?;
    let err = library.setting("feeds").await.expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(library.deleted(version).await?.contains(ObjectKind::Setting, "feeds"));
    Ok(())
}

#[tokio::test]
async fn fulltext_round_trip_and_versions() -> TestResult<()> {
    let server = FakeServer::new();
    let library = client_for(&server).user(1);
    let outcome = library
        .items()
        .create_many(&[ItemData::attachment(zapi::api::LinkMode::ImportedFile)])
        .await?;
    let key = outcome.key(0).ok_or("missing key")?.clone();

    library
        .put_fulltext(&key, &FullTextContent::paged("hello", 1, 2), Precondition::None)
        .await?;
    let version = server.library_version();

    let content = library.fulltext(&key).await?;
    assert_eq!(content.content, "hello");
    assert_eq!(content.indexed_pages, Some(1));
    assert_eq!(content.total_pages, Some(2));
    assert_eq!(content.version, Some(version));

    let changed = library.fulltext_versions(version - 1).await?;
    assert_eq!(changed.get(key.as_str()), Some(&version));
    assert!(library.fulltext_versions(version).await?.is_empty());

    let err = library
        .put_fulltext(
            &key,
            &FullTextContent::paged("stale", 1, 2),
            Precondition::Property(version - 1),
        )
        .await
        .expect_err("stale");
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(sent_header(&server), Some((version - 1).to_string()));

    let err = library
        .put_fulltext(
            &ObjectKey::generate()?,
            &FullTextContent::paged("x", 1, 1),
            Precondition::None,
        )
        .await
        .expect_err("no such item");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn root_calls_use_basic_credentials() -> TestResult<()> {
    let server = FakeServer::new();
    let client = root_client_for(&server);

    let info = client.key_info(API_KEY).await?;
    assert_eq!(info.key, API_KEY);
    assert_eq!(info.user_id, 1);
    assert_eq!(info.username.as_deref(), Some("tester"));
    let sent = server.last_request().ok_or("no request")?;
    assert!(sent.header("Authorization").unwrap_or_default().starts_with("Basic "));
    assert_eq!(sent.url.path(), format!("/keys/{API_KEY}"));

    let err = client
        .delete_group(5, Precondition::None)
        .await
        .expect_err("needs version");
    assert_eq!(err.kind(), ErrorKind::PreconditionRequired);

    client.delete_group(5, Precondition::Property(0)).await?;
    assert_eq!(sent_header(&server), Some("0".to_string()));
    Ok(())
}
