//! Admin API over the definition store.
//!
//! Thin CRUD surface mounted under `/api/admin`. Handlers only translate
//! between JSON and store calls; matching and rendering are never involved.

use crate::definition::{MockPatch, NewMockDefinition, ScenarioSpec};
use crate::error::{FieldError, StoreError, ValidationErrors};
use crate::handler::SharedState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Routes of the admin surface, relative to its mount point.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/mocks", get(list_mocks).post(create_mock))
        .route(
            "/mocks/:id",
            get(get_mock)
                .put(update_mock)
                .patch(update_mock)
                .delete(delete_mock),
        )
        .route("/scenarios", get(list_scenarios))
        .route(
            "/scenarios/:name",
            get(get_scenario)
                .put(upsert_scenario)
                .delete(delete_scenario),
        )
        .route(
            "/active-scenario",
            get(get_active_scenario).put(set_active_scenario),
        )
        .fallback(unknown_route)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

/// Admin failure, rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    InvalidBody(String),
    UnknownRoute(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Store(StoreError::Validation(errors)) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation_failed",
                    message: errors.to_string(),
                    fields: Some(errors.fields().to_vec()),
                },
            ),
            ApiError::Store(e @ StoreError::NotFound { .. }) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_found",
                    message: e.to_string(),
                    fields: None,
                },
            ),
            ApiError::Store(StoreError::Storage(e)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "storage_error",
                    message: e.to_string(),
                    fields: None,
                },
            ),
            ApiError::InvalidBody(reason) => {
                let errors = ValidationErrors::single("body", reason);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: "validation_failed",
                        message: errors.to_string(),
                        fields: Some(errors.fields().to_vec()),
                    },
                )
            }
            ApiError::UnknownRoute(path) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_found",
                    message: format!("no admin route for {}", path),
                    fields: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ListParams {
    scenario: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActiveScenario {
    scenario: String,
}

async fn list_mocks(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    Json(state.store.list(params.scenario.as_deref()).await)
}

async fn create_mock(
    State(state): State<SharedState>,
    body: Result<Json<NewMockDefinition>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(input) = body?;
    let created = state.store.create(input).await?;
    info!(
        mock_id = %created.id,
        scenario = %created.scenario,
        method = %created.method,
        path = %created.path_pattern,
        "Mock definition created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_mock(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get(&id).await?))
}

async fn update_mock(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Result<Json<MockPatch>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(patch) = body?;
    let updated = state.store.update(&id, patch).await?;
    info!(mock_id = %updated.id, revision = updated.revision, "Mock definition updated");
    Ok(Json(updated))
}

async fn delete_mock(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete(&id).await?;
    info!(mock_id = %id, "Mock definition deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_scenarios(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.store.scenarios().await)
}

async fn get_scenario(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get_scenario(&name).await?))
}

async fn upsert_scenario(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    body: Result<Json<ScenarioSpec>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(spec) = body?;
    let scenario = state.store.upsert_scenario(&name, spec).await?;
    info!(scenario = %scenario.name, parent = ?scenario.parent, "Scenario saved");
    Ok(Json(scenario))
}

async fn delete_scenario(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete_scenario(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_active_scenario(State(state): State<SharedState>) -> impl IntoResponse {
    Json(ActiveScenario {
        scenario: state.store.active_scenario().await,
    })
}

async fn set_active_scenario(
    State(state): State<SharedState>,
    body: Result<Json<ActiveScenario>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(ActiveScenario { scenario }) = body?;
    state.store.set_active_scenario(&scenario).await?;
    Ok(Json(ActiveScenario { scenario }))
}

async fn unknown_route(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::UnknownRoute(uri.path().to_string())
}
