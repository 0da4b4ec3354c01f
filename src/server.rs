//! HTTP server wiring: admin API, health check and the mock fallback.

use crate::admin;
use crate::config::{GlobalSettings, MockMateConfig};
use crate::handler::{
    handle_mock, AppState, SharedState, StatsSnapshot, MOCK_ID_HEADER, SERVED_SCENARIO_HEADER,
};
use crate::store::DefinitionStore;
use anyhow::Context;
use axum::extract::State;
use axum::http::{header, HeaderName, Method};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Mount point of the admin API.
pub const ADMIN_PREFIX: &str = "/api/admin";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    requests: StatsSnapshot,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        requests: state.stats.snapshot(),
    })
}

/// Any origin may call both surfaces and send the scenario override.
fn cors_layer(settings: &GlobalSettings) -> CorsLayer {
    let mut allowed = vec![header::CONTENT_TYPE, header::AUTHORIZATION];
    match HeaderName::from_bytes(settings.scenario_header.as_bytes()) {
        Ok(name) => allowed.push(name),
        Err(e) => warn!(
            header = %settings.scenario_header,
            error = %e,
            "Scenario header not allowed by CORS"
        ),
    }

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(allowed)
        .expose_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(MOCK_ID_HEADER),
            HeaderName::from_static(SERVED_SCENARIO_HEADER),
        ])
}

/// Build the full router. Anything not admin or `GET /health` is a mock
/// request, whatever its method.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.settings);
    Router::new()
        .route("/health", get(health).fallback(handle_mock))
        .nest(ADMIN_PREFIX, admin::router())
        .fallback(handle_mock)
        .with_state(state)
        .layer(cors)
}

/// Serve on an already bound listener until Ctrl-C or SIGTERM.
pub async fn serve(listener: TcpListener, state: SharedState) -> anyhow::Result<()> {
    let address = listener.local_addr()?;
    info!(
        address = %address,
        admin = %format!("http://{}{}", address, ADMIN_PREFIX),
        "Mock server listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Mock server stopped");
    Ok(())
}

/// Bind the configured address and serve `store`.
pub async fn run(config: &MockMateConfig, store: DefinitionStore) -> anyhow::Result<()> {
    let bind_address = config.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    let state = Arc::new(AppState::new(Arc::new(store), config.settings.clone()));
    serve(listener, state).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(Arc::new(AppState::new(
            Arc::new(DefinitionStore::in_memory()),
            GlobalSettings::default(),
        )))
    }

    async fn send(
        app: &Router,
        request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_define_then_serve_order() {
        let app = app();
        let (status, _, _) = send(
            &app,
            post_json(
                "/api/admin/mocks",
                json!({
                    "method": "GET",
                    "path": "/orders/:id",
                    "response": {"status": 200, "body": {"id": ":id"}}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, headers, body) = send(&app, get("/orders/7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-mockmate-scenario").unwrap(), "default");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"id": "7"}));
    }

    #[tokio::test]
    async fn test_templated_body_sees_query_and_body() {
        let app = app();
        send(
            &app,
            post_json(
                "/api/admin/mocks",
                json!({
                    "method": "POST",
                    "path": "/echo",
                    "response": {"body": "{{json.name}} via {{query.src}}"}
                }),
            ),
        )
        .await;

        let request = post_json("/echo?src=cli", json!({"name": "ada"}));
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ada via cli");
    }

    #[tokio::test]
    async fn test_scenario_override_header() {
        let app = app();
        send(
            &app,
            post_json(
                "/api/admin/mocks",
                json!({"path": "/flags", "response": {"body": {"beta": false}}}),
            ),
        )
        .await;
        send(
            &app,
            post_json(
                "/api/admin/mocks",
                json!({"scenario": "beta", "path": "/flags", "response": {"body": {"beta": true}}}),
            ),
        )
        .await;

        let request = Request::builder()
            .uri("/flags")
            .header("X-MockMate-Scenario", "beta")
            .body(Body::empty())
            .unwrap();
        let (_, headers, body) = send(&app, request).await;
        assert_eq!(headers.get("x-mockmate-scenario").unwrap(), "beta");
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"beta": true}));

        // Unknown scenario falls back to default
        let request = Request::builder()
            .uri("/flags")
            .header("X-MockMate-Scenario", "gamma")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("x-mockmate-scenario").unwrap(), "default");
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let app = app();
        send(&app, get("/missing")).await;

        let (status, _, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["requests"]["total"], 1);
        assert_eq!(body["requests"]["unmatched"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_non_get_health_reaches_mocks() {
        let app = app();
        send(
            &app,
            post_json(
                "/api/admin/mocks",
                json!({"method": "POST", "path": "/health", "response": {"body": "mocked"}}),
            ),
        )
        .await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"mocked");

        // No mock for DELETE, so the mock surface answers with its 404
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "no_mock_found");

        let (status, _, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_cors_allows_scenario_header() {
        let app = app();
        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/flags")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-mockmate-scenario")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, preflight).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        let allowed = headers
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .unwrap()
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed.contains("x-mockmate-scenario"));

        let request = Request::builder()
            .uri("/missing")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[tokio::test]
    async fn test_unmatched_request_is_404() {
        let app = app();
        let (status, headers, body) = send(&app, get("/api/other")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(headers.get("x-mockmate-mock-id").is_none());
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "no_mock_found");
        assert_eq!(body["path"], "/api/other");
    }

    #[tokio::test]
    async fn test_serve_on_ephemeral_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(
            Arc::new(DefinitionStore::in_memory()),
            GlobalSettings::default(),
        ));
        let server = tokio::spawn(serve(listener, state));

        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"ok\""));

        server.abort();
    }
}
