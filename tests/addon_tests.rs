// Proxy hook tests
// Drive ProxyAddon the way the runtime does, against a real SQLite store

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use cookie_catcher::{ConnectionId, ProxyAddon, SqliteStore, TlsDecision};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use tempfile::TempDir;

async fn create_store() -> (Arc<SqliteStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cookies.db");
    let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();
    (Arc::new(store), temp_dir)
}

/// Store with alice/s3cret and `example.com` watched
async fn configured_addon() -> (ProxyAddon, Arc<SqliteStore>, TempDir) {
    let (store, temp_dir) = create_store().await;
    store.set_username("alice").await.unwrap();
    store.set_password("s3cret").await.unwrap();
    store.add_domain("example.com").await.unwrap();
    (ProxyAddon::new(Arc::clone(&store)), store, temp_dir)
}

fn basic(username: &str, password: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

fn connect_request(authority: &str, auth: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().method("CONNECT").uri(authority);
    if let Some(value) = auth {
        builder = builder.header("proxy-authorization", value);
    }
    builder.body(()).unwrap()
}

fn get_request(uri: &str, auth: Option<&str>, cookie: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(value) = auth {
        builder = builder.header("proxy-authorization", value);
    }
    if let Some(value) = cookie {
        builder = builder.header("cookie", value);
    }
    builder.body(()).unwrap()
}

async fn body_text(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn assert_challenge(response: Response<Full<Bytes>>) {
    assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(
        response.headers()["proxy-authenticate"],
        "Basic realm=\"MITM Cookie Catcher\""
    );
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.headers()["connection"], "close");
    assert_eq!(body_text(response).await, "Proxy Authentication Required");
}

#[tokio::test]
async fn test_unconfigured_proxy_returns_503_and_captures_nothing() {
    let (store, _temp_dir) = create_store().await;
    store.add_domain("example.com").await.unwrap();
    let addon = ProxyAddon::new(Arc::clone(&store));
    let conn = ConnectionId::from_raw(1);

    let response = addon
        .on_connect(conn, &connect_request("example.com:443", Some(&basic("alice", "s3cret"))))
        .await
        .expect("CONNECT must be refused");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_text(response).await,
        "Proxy Setup Required: Please configure username/password (cookie-catcher credentials set)."
    );

    let response = addon
        .on_request(conn, &get_request("http://example.com/", None, Some("session=abc")))
        .await
        .expect("request must be refused");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert!(store.list_cookies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_half_configured_credentials_still_503() {
    let (store, _temp_dir) = create_store().await;
    store.set_username("alice").await.unwrap();
    let addon = ProxyAddon::new(Arc::clone(&store));

    let response = addon
        .on_connect(
            ConnectionId::from_raw(1),
            &connect_request("example.com:443", Some(&basic("alice", ""))),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_connect_authorizes_connection_for_later_requests() {
    let (addon, store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(7);

    let rejection = addon
        .on_connect(conn, &connect_request("example.com:443", Some(&basic("alice", "s3cret"))))
        .await;
    assert!(rejection.is_none());

    let rejection = addon
        .on_request(
            conn,
            &get_request("https://example.com/account", None, Some("session=abc; theme=dark")),
        )
        .await;
    assert!(rejection.is_none());

    let cookies = store.list_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].domain, "example.com");
    assert_eq!(cookies[0].content, "session=abc; theme=dark");
}

#[tokio::test]
async fn test_authorization_does_not_leak_to_other_connections() {
    let (addon, _store, _temp_dir) = configured_addon().await;

    addon
        .on_connect(
            ConnectionId::from_raw(1),
            &connect_request("example.com:443", Some(&basic("alice", "s3cret"))),
        )
        .await;

    let response = addon
        .on_request(
            ConnectionId::from_raw(2),
            &get_request("http://example.com/", None, None),
        )
        .await
        .expect("other connection must be challenged");
    assert_challenge(response).await;
}

#[tokio::test]
async fn test_every_auth_failure_gets_the_same_407() {
    let (addon, _store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(3);

    let failures = [
        None,
        Some("Basic !!!not-base64!!!".to_string()),
        Some("Bearer token".to_string()),
        Some(format!("Basic {}", general_purpose::STANDARD.encode("no-colon"))),
        Some(basic("alice", "wrong")),
        Some(basic("mallory", "s3cret")),
    ];

    for auth in failures {
        let response = addon
            .on_connect(conn, &connect_request("example.com:443", auth.as_deref()))
            .await
            .expect("CONNECT must be refused");
        assert_challenge(response).await;
    }

    // Nothing above authorized the connection
    let response = addon
        .on_request(conn, &get_request("http://example.com/", None, None))
        .await;
    assert!(response.is_some());
}

#[tokio::test]
async fn test_lowercase_basic_scheme_is_accepted() {
    let (addon, _store, _temp_dir) = configured_addon().await;
    let auth = basic("alice", "s3cret").replacen("Basic", "basic", 1);

    let rejection = addon
        .on_connect(
            ConnectionId::from_raw(1),
            &connect_request("example.com:443", Some(&auth)),
        )
        .await;
    assert!(rejection.is_none());
}

#[tokio::test]
async fn test_plain_request_with_valid_header_is_captured() {
    let (addon, store, _temp_dir) = configured_addon().await;

    let rejection = addon
        .on_request(
            ConnectionId::from_raw(1),
            &get_request(
                "http://sub.example.com/index.html",
                Some(&basic("alice", "s3cret")),
                Some("id=42"),
            ),
        )
        .await;
    assert!(rejection.is_none());

    let cookies = store.list_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].domain, "sub.example.com");
    assert_eq!(cookies[0].content, "id=42");
}

#[tokio::test]
async fn test_lookalike_domain_is_not_captured() {
    let (addon, store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(1);
    let auth = basic("alice", "s3cret");

    addon
        .on_request(
            conn,
            &get_request("http://notexample.com/", Some(&auth), Some("id=1")),
        )
        .await;
    addon
        .on_request(
            conn,
            &get_request("http://example.com.evil.net/", Some(&auth), Some("id=2")),
        )
        .await;

    assert!(store.list_cookies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mixed_case_watchlist_entry_intercepts_and_captures() {
    let (store, _temp_dir) = create_store().await;
    store.set_username("alice").await.unwrap();
    store.set_password("s3cret").await.unwrap();
    assert_eq!(store.add_domain("*.Example.COM").await.unwrap(), "example.com");
    let addon = ProxyAddon::new(Arc::clone(&store));
    let conn = ConnectionId::from_raw(1);

    assert_eq!(
        addon.on_client_hello(conn, Some("www.example.com")).await,
        TlsDecision::Intercept
    );
    assert_eq!(
        addon.on_client_hello(conn, Some("WWW.EXAMPLE.com")).await,
        TlsDecision::Intercept
    );

    let rejection = addon
        .on_request(
            conn,
            &get_request("http://Www.Example.COM/", Some(&basic("alice", "s3cret")), Some("sid=1")),
        )
        .await;
    assert!(rejection.is_none());

    let cookies = store.list_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].domain, "www.example.com");
    assert_eq!(cookies[0].content, "sid=1");
}

#[tokio::test]
async fn test_repeated_cookie_is_stored_once() {
    let (addon, store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(1);
    let auth = basic("alice", "s3cret");

    for _ in 0..3 {
        addon
            .on_request(
                conn,
                &get_request("http://example.com/", Some(&auth), Some("session=abc")),
            )
            .await;
    }

    let cookies = store.list_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].content, "session=abc");
}

#[tokio::test]
async fn test_request_without_cookies_stores_nothing() {
    let (addon, store, _temp_dir) = configured_addon().await;

    let rejection = addon
        .on_request(
            ConnectionId::from_raw(1),
            &get_request("http://example.com/", Some(&basic("alice", "s3cret")), None),
        )
        .await;
    assert!(rejection.is_none());
    assert!(store.list_cookies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_drops_authorization() {
    let (addon, _store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(9);

    addon
        .on_connect(conn, &connect_request("example.com:443", Some(&basic("alice", "s3cret"))))
        .await;
    assert!(addon.auth().sessions().is_authorized(conn).await);

    addon.on_client_disconnect(conn).await;
    assert!(!addon.auth().sessions().is_authorized(conn).await);

    let response = addon
        .on_request(conn, &get_request("http://example.com/", None, None))
        .await
        .expect("closed connection must re-authenticate");
    assert_challenge(response).await;

    // Disconnecting an unknown connection is harmless
    addon.on_client_disconnect(ConnectionId::from_raw(1000)).await;
}

#[tokio::test]
async fn test_credential_change_applies_immediately() {
    let (addon, store, _temp_dir) = configured_addon().await;

    store.set_password("rotated").await.unwrap();

    let response = addon
        .on_connect(
            ConnectionId::from_raw(1),
            &connect_request("example.com:443", Some(&basic("alice", "s3cret"))),
        )
        .await;
    assert!(response.is_some());

    let response = addon
        .on_connect(
            ConnectionId::from_raw(2),
            &connect_request("example.com:443", Some(&basic("alice", "rotated"))),
        )
        .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn test_client_hello_decisions() {
    let (addon, store, _temp_dir) = configured_addon().await;
    let conn = ConnectionId::from_raw(1);

    assert_eq!(
        addon.on_client_hello(conn, Some("example.com")).await,
        TlsDecision::Intercept
    );
    assert_eq!(
        addon.on_client_hello(conn, Some("api.example.com")).await,
        TlsDecision::Intercept
    );
    assert_eq!(
        addon.on_client_hello(conn, Some("notexample.com")).await,
        TlsDecision::PassThrough
    );
    assert_eq!(addon.on_client_hello(conn, None).await, TlsDecision::Default);

    // Watchlist edits are visible to the next handshake
    store.add_domain("*.other.org").await.unwrap();
    assert_eq!(
        addon.on_client_hello(conn, Some("www.other.org")).await,
        TlsDecision::Intercept
    );

    store.remove_domain("example.com").await.unwrap();
    assert_eq!(
        addon.on_client_hello(conn, Some("example.com")).await,
        TlsDecision::PassThrough
    );
}

#[tokio::test]
async fn test_custom_realm_in_challenge() {
    let (store, _temp_dir) = create_store().await;
    store.set_username("alice").await.unwrap();
    store.set_password("s3cret").await.unwrap();
    let addon = ProxyAddon::new(Arc::clone(&store)).with_realm("Lab Proxy");

    let response = addon
        .on_connect(ConnectionId::from_raw(1), &connect_request("example.com:443", None))
        .await
        .unwrap();
    assert_eq!(
        response.headers()["proxy-authenticate"],
        "Basic realm=\"Lab Proxy\""
    );
}
