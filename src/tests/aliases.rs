use std::collections::HashSet;

use axum::http::StatusCode;
use serde_json::json;

use crate::tests::helper;

#[tokio::test]
async fn test_create_aliases() {
    let (mut app, _services) = helper::setup_test_app().await;

    let aliases = helper::create_aliases(
        &mut app,
        &["http://example.com/a", "http://example.com/b"],
        None,
    )
    .await;

    assert_eq!(2, aliases.len());

    // input order
    assert_eq!("http://example.com/a", aliases[0].target);
    assert_eq!("http://example.com/b", aliases[1].target);

    for alias in &aliases {
        assert_eq!(8, alias.key.len());
        assert_eq!(
            format!("http://localhost:6000/{}", alias.key),
            alias.short_url
        );
        assert_eq!(json!({ "type": "permanent" }), alias.usage_policy);
    }

    assert_ne!(aliases[0].key, aliases[1].key);
}

#[tokio::test]
async fn test_create_limited_aliases() {
    let (mut app, _services) = helper::setup_test_app().await;

    let aliases = helper::create_aliases(&mut app, &["http://example.com/b"], Some(2)).await;

    assert_eq!(
        json!({ "type": "limited", "triesLeft": 2 }),
        aliases[0].usage_policy
    );
}

#[tokio::test]
async fn test_create_without_urls() {
    let (mut app, _services) = helper::setup_test_app().await;

    let (status_code, aliases, error) = helper::maybe_create_aliases(&mut app, &[], None).await;

    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(aliases.is_none());
    assert_eq!("No URLs given", error.unwrap().error);
}

#[tokio::test]
async fn test_create_with_invalid_url() {
    let (mut app, _services) = helper::setup_test_app().await;

    let (status_code, aliases, error) =
        helper::maybe_create_aliases(&mut app, &["http://example.com/", "not a url"], None).await;

    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(aliases.is_none());

    let error = error.unwrap();
    assert_eq!("Invalid target", error.error);
    assert!(error.description.is_some());
}

#[tokio::test]
async fn test_create_with_too_large_usage_count() {
    let (mut app, _services) = helper::setup_test_app().await;

    let (status_code, aliases, error) = helper::maybe_create_aliases(
        &mut app,
        &["http://example.com/"],
        Some(u64::MAX),
    )
    .await;

    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(aliases.is_none());
    assert_eq!("Invalid usage count", error.unwrap().error);

    let aliases = helper::create_aliases(
        &mut app,
        &["http://example.com/"],
        Some(i64::MAX.unsigned_abs()),
    )
    .await;

    assert_eq!(1, aliases.len());
}

#[tokio::test]
async fn test_keys_are_unique() {
    let (mut app, _services) = helper::setup_test_app().await;

    let urls = vec!["http://example.com/"; 25];

    let mut keys = HashSet::new();

    for _ in 0..4 {
        for alias in helper::create_aliases(&mut app, &urls, None).await {
            assert!(keys.insert(alias.key));
        }
    }

    assert_eq!(100, keys.len());
}

#[tokio::test]
async fn test_permanent_alias_never_expires() {
    let (mut app, _services) = helper::setup_test_app().await;

    let aliases = helper::create_aliases(&mut app, &["http://example.com/a"], None).await;
    let key = &aliases[0].key;

    for _ in 0..100 {
        let (status_code, location, _) = helper::root(&mut app, key).await;

        assert_eq!(StatusCode::TEMPORARY_REDIRECT, status_code);
        assert_eq!(Some("http://example.com/a".to_string()), location);
    }
}

#[tokio::test]
async fn test_limited_alias_expires() {
    let (mut app, services) = helper::setup_test_app().await;

    let aliases = helper::create_aliases(&mut app, &["http://example.com/b"], Some(2)).await;
    let key = &aliases[0].key;

    for _ in 0..2 {
        let (status_code, location, _) = helper::root(&mut app, key).await;

        assert_eq!(StatusCode::TEMPORARY_REDIRECT, status_code);
        assert_eq!(Some("http://example.com/b".to_string()), location);
    }

    // the decrements are applied by the usage counter in the background
    helper::wait_until_tries_left(&services, key, 0).await;

    for _ in 0..2 {
        let (status_code, location, body) = helper::root(&mut app, key).await;

        assert_eq!(StatusCode::GONE, status_code);
        assert_eq!(None, location);
        assert!(body.contains("Alias expired"));
    }

    // one audit row per resolution against the exhausted alias
    let stats = services.storage.stats.clone();
    helper::wait_until(|| {
        let stats = stats.clone();

        async move { stats.find_all_expired().await.unwrap().len() == 2 }
    })
    .await;

    let expired = helper::list_expired(&mut app).await;
    assert_eq!(2, expired.len());

    for record in expired {
        assert_eq!(json!(key), record["key"]);
        assert_eq!(json!("http://example.com/b"), record["target"]);
        assert!(record["eventId"].is_string());
        assert!(record["occurredAt"].is_string());
    }

    services.stop().await;
}

#[tokio::test]
async fn test_remove_alias() {
    let (mut app, _services) = helper::setup_test_app().await;

    assert_eq!(
        StatusCode::NOT_FOUND,
        helper::maybe_delete_alias(&mut app, "unknown").await
    );

    let aliases = helper::create_aliases(&mut app, &["http://example.com/c"], None).await;
    let key = &aliases[0].key;

    let (status_code, _, _) = helper::root(&mut app, key).await;
    assert_eq!(StatusCode::TEMPORARY_REDIRECT, status_code);

    assert_eq!(
        StatusCode::NO_CONTENT,
        helper::maybe_delete_alias(&mut app, key).await
    );

    // visible right away
    let (status_code, location, _) = helper::root(&mut app, key).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!(None, location);

    assert_eq!(
        StatusCode::NOT_FOUND,
        helper::maybe_delete_alias(&mut app, key).await
    );
}

#[tokio::test]
async fn test_removed_limited_alias_is_not_expired() {
    let (mut app, services) = helper::setup_test_app().await;

    let aliases = helper::create_aliases(&mut app, &["http://example.com/d"], Some(1)).await;
    let key = &aliases[0].key;

    let (status_code, _, _) = helper::root(&mut app, key).await;
    assert_eq!(StatusCode::TEMPORARY_REDIRECT, status_code);

    helper::wait_until_tries_left(&services, key, 0).await;

    assert_eq!(
        StatusCode::NO_CONTENT,
        helper::maybe_delete_alias(&mut app, key).await
    );

    let (status_code, _, _) = helper::root(&mut app, key).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
}

#[tokio::test]
async fn test_healthcheck() {
    let (mut app, _services) = helper::setup_test_app().await;

    assert_eq!(StatusCode::OK, helper::healthcheck(&mut app).await);
}
