//! Mock handler: the boundary between HTTP and the resolution engine.
//!
//! Every request that is not an admin or health call lands here. The handler
//! describes the request, picks the scenario, resolves a definition and
//! renders it. It never fails: a miss becomes a diagnostic 404.

use crate::config::GlobalSettings;
use crate::descriptor::RequestDescriptor;
use crate::matcher::Matcher;
use crate::responder::Responder;
use crate::store::{Catalog, DefinitionStore};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response header naming the definition that produced the response.
pub const MOCK_ID_HEADER: &str = "x-mockmate-mock-id";
/// Response header naming the scenario that supplied the definition.
pub const SERVED_SCENARIO_HEADER: &str = "x-mockmate-scenario";

/// Shared state of the HTTP surfaces.
pub struct AppState {
    pub store: Arc<DefinitionStore>,
    pub responder: Responder,
    pub settings: GlobalSettings,
    pub stats: RequestStats,
}

pub type SharedState = Arc<AppState>;

/// Request counters for the mock surface.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub matched: u64,
    pub unmatched: u64,
}

impl RequestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
struct MissResponse<'a> {
    error: &'static str,
    message: String,
    method: &'a str,
    path: &'a str,
    scenario: &'a str,
}

impl AppState {
    pub fn new(store: Arc<DefinitionStore>, settings: GlobalSettings) -> Self {
        Self {
            store,
            responder: Responder::new(settings.default_content_type.clone()),
            settings,
            stats: RequestStats::default(),
        }
    }

    /// Scenario for this request: the override header, else the active one.
    fn scenario_for(&self, descriptor: &RequestDescriptor, catalog: &Catalog) -> String {
        descriptor
            .header(&self.settings.scenario_header)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| catalog.active_scenario())
            .to_string()
    }

    /// Resolve and render one described request.
    pub async fn respond(&self, descriptor: RequestDescriptor) -> Response {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let catalog = self.store.snapshot().await;
        let scenario = self.scenario_for(&descriptor, &catalog);

        let resolved = Matcher::new(&catalog)
            .resolve(&descriptor, &scenario)
            .map(|resolution| {
                let rendered = self.responder.render(&resolution, &descriptor);
                let delay_ms = resolution
                    .definition
                    .delay
                    .as_ref()
                    .map(|d| d.calculate())
                    .unwrap_or(0);
                (
                    rendered,
                    resolution.definition.id.clone(),
                    resolution.scenario,
                    delay_ms,
                )
            });

        let Some((rendered, mock_id, served_by, delay_ms)) = resolved else {
            return self.miss(&descriptor, &scenario);
        };

        self.stats.matched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_matches {
            info!(
                mock_id = %mock_id,
                method = %descriptor.method,
                path = %descriptor.path,
                scenario = %served_by,
                requested_scenario = %scenario,
                status = rendered.status.as_u16(),
                "Request matched mock"
            );
        }

        if delay_ms > 0 {
            debug!(mock_id = %mock_id, delay_ms, "Applying delay");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let mut response = rendered.into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&mock_id) {
            headers.insert(HeaderName::from_static(MOCK_ID_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&served_by) {
            headers.insert(HeaderName::from_static(SERVED_SCENARIO_HEADER), value);
        }
        response
    }

    fn miss(&self, descriptor: &RequestDescriptor, scenario: &str) -> Response {
        self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            warn!(
                method = %descriptor.method,
                path = %descriptor.path,
                scenario = %scenario,
                "No matching mock found"
            );
        }

        let body = MissResponse {
            error: "no_mock_found",
            message: format!(
                "No mock definition matches {} {} in scenario {:?}",
                descriptor.method, descriptor.path, scenario
            ),
            method: descriptor.method.as_str(),
            path: &descriptor.path,
            scenario,
        };
        (StatusCode::NOT_FOUND, Json(body)).into_response()
    }
}

/// Fallback route serving every mock request.
pub async fn handle_mock(State(state): State<SharedState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.settings.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                path = %parts.uri.path(),
                error = %e,
                "Could not read request body, treating it as empty"
            );
            Bytes::new()
        }
    };

    let descriptor = RequestDescriptor::new(parts.method, parts.uri.path())
        .with_query(parts.uri.query().unwrap_or(""))
        .with_headers(&parts.headers)
        .with_body(body);

    state.respond(descriptor).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{BodyTemplate, DelayConfig, NewMockDefinition};
    use axum::http::Method;

    fn state() -> AppState {
        AppState::new(Arc::new(DefinitionStore::in_memory()), GlobalSettings::default())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_order_scenario_without_header() {
        let state = state();
        let mut input = NewMockDefinition::new("GET", "/orders/:id");
        input.response.body = Some(BodyTemplate::Json(serde_json::json!({"id": ":id"})));
        let created = state.store.create(input).await.unwrap();

        let response = state
            .respond(RequestDescriptor::new(Method::GET, "/orders/7"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(MOCK_ID_HEADER).unwrap(),
            created.id.as_str()
        );
        assert_eq!(
            response.headers().get(SERVED_SCENARIO_HEADER).unwrap(),
            "default"
        );
        assert_eq!(body_json(response).await, serde_json::json!({"id": "7"}));
    }

    #[tokio::test]
    async fn test_miss_is_diagnostic_404() {
        let state = state();
        let response = state
            .respond(
                RequestDescriptor::new(Method::POST, "/nothing/here")
                    .with_header("X-MockMate-Scenario", "beta"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "no_mock_found");
        assert_eq!(body["method"], "POST");
        assert_eq!(body["path"], "/nothing/here");
        assert_eq!(body["scenario"], "beta");

        let stats = state.stats.snapshot();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.unmatched, 1);
    }

    #[tokio::test]
    async fn test_header_selects_scenario() {
        let state = state();
        let mut default = NewMockDefinition::new("GET", "/status");
        default.response.body = Some(BodyTemplate::Text("default".to_string()));
        state.store.create(default).await.unwrap();
        let mut beta = NewMockDefinition::new("GET", "/status");
        beta.scenario = "beta".to_string();
        beta.response.body = Some(BodyTemplate::Text("beta".to_string()));
        state.store.create(beta).await.unwrap();

        let plain = state
            .respond(RequestDescriptor::new(Method::GET, "/status"))
            .await;
        let bytes = axum::body::to_bytes(plain.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"default");

        let with_header = state
            .respond(
                RequestDescriptor::new(Method::GET, "/status")
                    .with_header("x-mockmate-scenario", " beta "),
            )
            .await;
        let bytes = axum::body::to_bytes(with_header.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"beta");

        // Blank header means the active scenario
        let blank = state
            .respond(
                RequestDescriptor::new(Method::GET, "/status")
                    .with_header("x-mockmate-scenario", ""),
            )
            .await;
        let bytes = axum::body::to_bytes(blank.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"default");
    }

    #[tokio::test]
    async fn test_active_scenario_used_without_header() {
        let state = state();
        let mut beta = NewMockDefinition::new("GET", "/feature");
        beta.scenario = "beta".to_string();
        state.store.create(beta).await.unwrap();

        let response = state
            .respond(RequestDescriptor::new(Method::GET, "/feature"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        state.store.set_active_scenario("beta").await.unwrap();
        let response = state
            .respond(RequestDescriptor::new(Method::GET, "/feature"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delay_applied() {
        let state = state();
        let mut input = NewMockDefinition::new("GET", "/slow");
        input.delay = Some(DelayConfig {
            fixed_ms: 50,
            min_ms: 0,
            max_ms: 0,
        });
        state.store.create(input).await.unwrap();

        let started = std::time::Instant::now();
        let response = state
            .respond(RequestDescriptor::new(Method::GET, "/slow"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(state.stats.snapshot().matched, 1);
    }
}
