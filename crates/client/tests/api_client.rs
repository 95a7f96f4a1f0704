//! `ApiClient` against a stub HTTP server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use notifeed_client::{ApiClient, NotificationApi, StaticToken};
use notifeed_shared::{NotificationId, NotificationKind};
use serde_json::json;

#[derive(Clone, Default)]
struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some("Bearer good-token")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "title": "Unauthorized", "status": 401, "detail": "token expired" })),
    )
        .into_response()
}

async fn list(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        { "id": 7, "type": 4, "message": "disk failure", "createdAt": "2024-05-01T10:00:00Z", "isRead": false },
        { "id": "a-1", "type": 99, "message": "hello", "createdAt": "2024-05-01T09:00:00.1234567", "isRead": true },
        { "id": 3, "message": "bare" }
    ]))
    .into_response()
}

async fn mark_read(
    State(calls): State<Calls>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    calls.0.lock().unwrap().push(format!("read:{id}"));
    StatusCode::OK.into_response()
}

async fn mark_all(State(calls): State<Calls>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    calls.0.lock().unwrap().push("read-all".to_string());
    StatusCode::NO_CONTENT.into_response()
}

async fn serve() -> (SocketAddr, Calls) {
    let calls = Calls::default();
    let app = Router::new()
        .route("/api/notification", get(list))
        .route("/api/notification/mark-all-read", post(mark_all))
        .route("/api/notification/{id}/read", post(mark_read))
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

fn client(addr: SocketAddr, token: &str) -> ApiClient {
    ApiClient::new(Arc::new(StaticToken::new(token)))
        .with_base_url(format!("http://{addr}/api"))
        .with_timeout(Duration::from_secs(5))
        .unwrap()
}

#[tokio::test]
async fn lists_notifications_with_lenient_fields() {
    let (addr, _) = serve().await;
    let notifications = client(addr, "good-token").list_notifications().await.unwrap();

    assert_eq!(notifications.len(), 3);
    assert_eq!(notifications[0].id, NotificationId::from(7));
    assert_eq!(notifications[0].kind, NotificationKind::Critical);
    assert!(notifications[0].created_at.is_some());
    assert!(!notifications[0].is_read);

    assert_eq!(notifications[1].id.as_str(), "a-1");
    assert_eq!(notifications[1].kind, NotificationKind::General(99));
    assert!(notifications[1].created_at.is_some());
    assert!(notifications[1].is_read);

    assert_eq!(notifications[2].kind, NotificationKind::default());
    assert!(notifications[2].created_at.is_none());
    assert!(!notifications[2].is_read);
}

#[tokio::test]
async fn read_marking_hits_the_right_endpoints() {
    let (addr, calls) = serve().await;
    let api = client(addr, "good-token");

    api.mark_notification_read(&NotificationId::from("a b"))
        .await
        .unwrap();
    api.mark_all_notifications_read().await.unwrap();

    assert_eq!(calls.take(), vec!["read:a b", "read-all"]);
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let (addr, calls) = serve().await;
    let api = client(addr, "stale-token");

    let err = api.list_notifications().await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.user_message(), "token expired");

    let err = api.mark_all_notifications_read().await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(calls.take().is_empty());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(addr, "good-token").list_notifications().await.unwrap_err();
    assert!(matches!(err, notifeed_shared::ApiError::Network(_)));
}
