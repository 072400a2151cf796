//! Token refresh and retry behaviour of the session client

use reqwest::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use webistream_core::credentials::{ACCESS_TOKEN_KEY, REFRESH_EXPIRES_AT_KEY, REFRESH_TOKEN_KEY};
use webistream_core::toast::SESSION_EXPIRED_MESSAGE;
use webistream_core::{CredentialStore, MemoryStore, ToastKind, take_persisted_toast};
use webistream_http::{ClientError, ExpiryReason, SessionClient, SessionEvent, WebistreamClient};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH_PATH: &str = "/v1/login/refresh-token";

fn signed_in_store(access: &str, refresh: Option<&str>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.set(ACCESS_TOKEN_KEY, access).unwrap();
    if let Some(refresh) = refresh {
        store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
    }
    store
}

fn session_for(server: &MockServer, store: Arc<MemoryStore>) -> SessionClient {
    let client = WebistreamClient::new(server.uri()).unwrap();
    SessionClient::new(client, store)
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

async fn mount_rejection(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Could not validate credentials"})),
        )
        .mount(server)
        .await;
}

fn assert_logged_out(store: &MemoryStore) {
    assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
    assert_eq!(store.get(REFRESH_TOKEN_KEY), None);
    assert_eq!(store.get(REFRESH_EXPIRES_AT_KEY), None);

    let toast = take_persisted_toast(store).expect("expiry toast persisted");
    assert_eq!(toast.kind, ToastKind::Error);
    assert_eq!(toast.description, SESSION_EXPIRED_MESSAGE);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer new123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refreshToken": "r1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "accessToken": "new123",
                    "refreshToken": "r2",
                    "refreshExpiresAt": "2030-06-01T12:00:00Z"
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let call = |delay_ms: u64| {
        let session = session.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            session
                .send(session.request(Method::GET, "/v1/webinars"))
                .await
        }
    };

    let (a, b, c) = tokio::join!(call(0), call(10), call(20));
    for response in [a, b, c] {
        assert_eq!(response.unwrap().status(), StatusCode::OK);
    }

    assert_eq!(session.coordinator().attempts(), 1);
    assert!(!session.coordinator().is_refreshing());
    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some("new123".into()));
    assert_eq!(store.get(REFRESH_TOKEN_KEY), Some("r2".into()));
    assert!(
        store
            .get(REFRESH_EXPIRES_AT_KEY)
            .is_some_and(|at| at.starts_with("2030-06-01T12:00:00"))
    );
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);
}

#[tokio::test]
async fn test_missing_refresh_token_expires_without_refresh() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = signed_in_store("old", None);
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Expired(ExpiryReason::MissingRefreshToken)]
    );
}

#[tokio::test]
async fn test_expired_refresh_token_is_not_sent() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    store
        .set(REFRESH_EXPIRES_AT_KEY, "2001-01-01T00:00:00Z")
        .unwrap();
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let result: Result<serde_json::Value, _> = session
        .execute(session.request(Method::GET, "/v1/webinars"))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::SessionExpired(ExpiryReason::RefreshTokenExpired))
    ));
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Expired(ExpiryReason::RefreshTokenExpired)]
    );
}

#[tokio::test]
async fn test_refresh_server_error_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Expired(ExpiryReason::RefreshFailed)]
    );
}

#[tokio::test]
async fn test_refresh_without_access_token_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"refreshToken": "r2"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());

    let result: Result<serde_json::Value, _> = session
        .execute(session.request(Method::GET, "/v1/webinars"))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::SessionExpired(ExpiryReason::RefreshFailed))
    ));
    assert_logged_out(&store);
}

#[tokio::test]
async fn test_malformed_refresh_body_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_logged_out(&store);
}

#[tokio::test]
async fn test_refresh_timeout_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"accessToken": "too-late"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session =
        session_for(&server, store.clone()).with_refresh_timeout(Duration::from_millis(100));
    let mut events = session.subscribe();

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Expired(ExpiryReason::RefreshFailed)]
    );
}

#[tokio::test]
async fn test_retry_still_unauthorized_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session.coordinator().attempts(), 1);
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Refreshed,
            SessionEvent::Expired(ExpiryReason::RetryFailed)
        ]
    );
}

#[tokio::test]
async fn test_retry_server_error_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer new123"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();

    // the caller sees the original rejection, not the retry's 500
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session.coordinator().attempts(), 1);
    assert_logged_out(&store);
    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Refreshed,
            SessionEvent::Expired(ExpiryReason::RetryFailed)
        ]
    );
}

#[tokio::test]
async fn test_retry_forbidden_is_terminal() {
    let server = MockServer::start().await;
    mount_rejection(&server, "old").await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer new123"))
        .respond_with(ResponseTemplate::new(403).set_body_string("not your webinar"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());

    let result: Result<serde_json::Value, _> = session
        .execute(session.request(Method::GET, "/v1/webinars"))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::SessionExpired(ExpiryReason::RetryFailed))
    ));
    assert_logged_out(&store);
}

#[tokio::test]
async fn test_streaming_body_is_not_replayed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer new123"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let chunks = futures::stream::once(async {
        Ok::<_, std::io::Error>(r#"{"title":"Quarterly review"}"#)
    });
    let response = session
        .send(
            session
                .request(Method::POST, "/v1/webinars")
                .body(reqwest::Body::wrap_stream(chunks)),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(session.coordinator().attempts(), 1);
    // refreshed session is kept, the user is not logged out
    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some("new123".into()));
    assert_eq!(store.get(REFRESH_TOKEN_KEY), Some("r1".into()));
    assert_eq!(take_persisted_toast(store.as_ref()), None);
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);
}

#[tokio::test]
async fn test_non_401_responses_pass_through() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store.clone());
    let mut events = session.subscribe();

    let body: serde_json::Value = session
        .execute(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();
    assert_eq!(body["items"], json!([1, 2]));

    let response = session
        .send(session.request(Method::GET, "/v1/broken"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some("old".into()));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_each_expiry_window_refreshes_again() {
    let server = MockServer::start().await;
    mount_rejection(&server, "a1").await;
    mount_rejection(&server, "a2").await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer a3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refreshToken": "r1"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"accessToken": "a2", "refreshToken": "r2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refreshToken": "r2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "a3"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("a1", Some("r1"));
    let session = session_for(&server, store.clone());

    // first window: a1 rejected, refreshed to a2, retry accepted once
    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // second window: a2 now rejected, refreshed with the rotated token
    let response = session
        .send(session.request(Method::GET, "/v1/webinars"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(session.coordinator().attempts(), 2);
    assert_eq!(store.get(ACCESS_TOKEN_KEY), Some("a3".into()));
    assert_eq!(store.get(REFRESH_TOKEN_KEY), Some("r2".into()));
}

#[tokio::test]
async fn test_retry_replays_body_with_new_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/webinars"))
        .and(header("authorization", "Bearer new123"))
        .and(body_json(json!({"title": "Quarterly review"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "w1"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = signed_in_store("old", Some("r1"));
    let session = session_for(&server, store);

    let created: serde_json::Value = session
        .execute(
            session
                .request(Method::POST, "/v1/webinars")
                .json(&json!({"title": "Quarterly review"})),
        )
        .await
        .unwrap();
    assert_eq!(created["id"], "w1");
}

#[tokio::test]
async fn test_current_user_after_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header("authorization", "Bearer new123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {"id": "u1", "email": "ada@example.com", "roles": ["host"]}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "new123"})))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, signed_in_store("old", Some("r1")));

    let user = session.current_user().await.unwrap().unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.roles, vec!["host".to_string()]);
}
