#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use graphsync_core::graph::{GraphSnapshot, Node, Position};
use graphsync_core::store::VersionedStore;
use http_body_util::BodyExt;
use tower::ServiceExt;

use graphsync_api::config::ServerConfig;
use graphsync_api::router::build_app_router;
use graphsync_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Full router over `store`, with the production middleware stack.
pub fn build_test_app(store: VersionedStore) -> Router {
    build_app_router(AppState::with_store(store, test_config()))
}

/// Version-1 graph `name` with nodes `a` and `b`.
pub fn seeded_graph(name: &str) -> GraphSnapshot {
    let mut snapshot = GraphSnapshot::empty(name);
    snapshot.version = 1;
    snapshot.nodes = vec![
        Node::new("a", "shell", Position::new(10.0, 20.0)),
        Node::new("b", "shell", Position::new(300.0, 20.0)),
    ];
    snapshot
}

pub fn seeded_store(name: &str) -> VersionedStore {
    let mut store = VersionedStore::new();
    store.insert(seeded_graph(name));
    store
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serve `store` on an ephemeral local port. Returns the base URL.
pub async fn spawn_server(store: VersionedStore) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_test_app(store);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
