//! Image store fetch behaviour against a live HTTP server.

mod common;

use acb_runtime::AppRef;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

#[tokio::test]
async fn test_pinned_fetch_downloads_once() {
    let server = MockServer::start().await;
    let bytes = common::aci_bytes(&common::manifest("example.com/base", "1.0"), &[("a", "A")]);
    Mock::given(method("GET"))
        .and(path("/base.aci"))
        .and(|req: &Request| !req.headers.contains_key("if-none-match"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(bytes),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/base.aci"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = common::store(tmp.path(), &server);
    let app = AppRef::parse("example.com/base:1.0").unwrap();

    let first = store.fetch(&app, None, false).await.unwrap();
    let second = store.fetch(&app, None, false).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list_keys().unwrap(), vec![first]);
}

#[tokio::test]
async fn test_latest_fetch_always_downloads() {
    let server = MockServer::start().await;
    let bytes = common::aci_bytes(&common::manifest("example.com/base", "latest"), &[("a", "A")]);
    Mock::given(method("GET"))
        .and(path("/base.aci"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(bytes),
        )
        .expect(2)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = common::store(tmp.path(), &server);
    let app = AppRef::parse("example.com/base").unwrap();

    let first = store.fetch(&app, None, false).await.unwrap();
    let second = store.fetch(&app, None, false).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list_keys().unwrap().len(), 1);
}

#[tokio::test]
async fn test_forced_fetch_skips_revalidation() {
    let server = MockServer::start().await;
    let bytes = common::aci_bytes(&common::manifest("example.com/base", "1.0"), &[("a", "A")]);
    Mock::given(method("GET"))
        .and(path("/base.aci"))
        .and(|req: &Request| !req.headers.contains_key("if-none-match"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(bytes),
        )
        .expect(2)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = common::store(tmp.path(), &server);
    let app = AppRef::parse("example.com/base:1.0").unwrap();

    store.fetch(&app, None, false).await.unwrap();
    store.fetch(&app, None, true).await.unwrap();
}

#[tokio::test]
async fn test_fetched_image_can_be_found_and_removed() {
    let server = MockServer::start().await;
    common::serve_image(&server, "tools", &[("bin/tool", "#!/bin/sh")]).await;

    let tmp = TempDir::new().unwrap();
    let store = common::store(tmp.path(), &server);
    let app = AppRef::parse("example.com/tools:1").unwrap();
    let key = store.fetch(&app, None, false).await.unwrap();

    assert_eq!(store.find_key("example.com/tools", &app.labels).unwrap(), key);
    let root = store.expanded_root(&key).unwrap();
    assert_eq!(common::read(&root.join("bin/tool")), "#!/bin/sh");

    let entries = store.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].remote.as_ref().unwrap().aci_url.ends_with("/tools.aci"));

    store.delete(&key).unwrap();
    assert!(store.list_keys().unwrap().is_empty());
    assert!(store.find_key("example.com/tools", &app.labels).is_err());
}
