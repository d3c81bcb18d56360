//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Greeting |
//! | `GET`  | `/health` | Status, version and queue figures |
//! | `POST` | `/items/` | Create a legacy item |
//! | `POST` | `/materials/` | Submit a material for ingestion |
//! | `GET`  | `/materials/recent?limit=N` | Newest materials first (default 10, max 100) |
//! | `GET`  | `/materials/{id}` | One material including its extracted text |
//! | `POST` | `/schedules/` | Monitor a material on an interval |
//! | `GET`  | `/schedules/?include_inactive=bool` | List schedules |
//! | `GET`  | `/schedules/{id}` | One schedule |
//! | `DELETE` | `/schedules/{id}` | Deactivate a schedule |
//!
//! # Error Contract
//!
//! Every error response has the shape `{ "detail": "..." }`.
//!
//! | Status | Cause |
//! |--------|-------|
//! | 404 | unknown material or schedule |
//! | 409 | material status does not allow the operation |
//! | 422 | malformed body, query or path, or a validation failure |
//! | 503 | ingestion queue full |
//! | 500 | storage failure |
//!
//! # CORS
//!
//! Origins come from `[server].cors_origins`. Credentials are allowed, so
//! methods and headers mirror the preflight request. A single `"*"` entry
//! allows any origin without credentials.

use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use finsight_core::error::{StoreError, ValidationError};
use finsight_core::models::{Item, NewMaterial};

use crate::config::Config;
use crate::dispatcher::{DispatchError, DispatcherStats};
use crate::get::{clamp_recent_limit, MaterialResponse};
use crate::ingest::{submit_material, SubmitError};
use crate::runtime::{Runtime, Services};
use crate::schedules::{cancel_schedule, create_schedule, CreateSchedule, ScheduleError, ScheduleResponse};

pub const GREETING: &str = "Hello, FinSight AI Backend!";

/// Starts the API server with the dispatcher and schedule engine.
///
/// Runs until Ctrl-C, then stops accepting requests, stops the schedule
/// engine and drains the ingestion queue.
pub async fn run_server(config: &Config) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    runtime.start_scheduler();

    let app = router(runtime.services.clone(), &config.server.cors_origins)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "FinSight API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Builds the API router around `services`.
pub fn router(services: Services, cors_origins: &[String]) -> Result<Router> {
    let app = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/items", post(handle_create_item))
        .route("/items/", post(handle_create_item))
        .route("/materials", post(handle_create_material))
        .route("/materials/", post(handle_create_material))
        .route("/materials/recent", get(handle_recent))
        .route("/materials/{id}", get(handle_get_material))
        .route(
            "/schedules",
            post(handle_create_schedule).get(handle_list_schedules),
        )
        .route(
            "/schedules/",
            post(handle_create_schedule).get(handle_list_schedules),
        )
        .route(
            "/schedules/{id}",
            get(handle_get_schedule).delete(handle_cancel_schedule),
        )
        .layer(cors_layer(cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(services);
    Ok(app)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o.trim_end_matches('/'))
                .with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::unprocessable(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            StoreError::InvalidTransition { .. } => Self::new(StatusCode::CONFLICT, err.to_string()),
            StoreError::Backend(e) => {
                tracing::error!(error = %e, "storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(e) => e.into(),
            SubmitError::Dispatch(e) => e.into(),
            SubmitError::Store(e) => e.into(),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Validation(e) => e.into(),
            ScheduleError::Store(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": GREETING }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    dispatcher: DispatcherStats,
}

async fn handle_health(State(services): State<Services>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        dispatcher: services.dispatcher.stats(),
    })
}

// ============ POST /items/ ============

#[derive(Deserialize)]
struct ItemCreate {
    name: String,
    description: String,
}

async fn handle_create_item(
    State(services): State<Services>,
    payload: Result<Json<ItemCreate>, JsonRejection>,
) -> Result<Json<Item>, ApiError> {
    let Json(payload) = payload?;
    let item = Item {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
    };
    services.items.insert_item(&item).await?;
    Ok(Json(item))
}

// ============ /materials ============

async fn handle_create_material(
    State(services): State<Services>,
    payload: Result<Json<NewMaterial>, JsonRejection>,
) -> Result<Json<MaterialResponse>, ApiError> {
    let Json(payload) = payload?;
    let material = submit_material(&services, payload).await?;
    Ok(Json(MaterialResponse::summary(&material)))
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn handle_recent(
    State(services): State<Services>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<MaterialResponse>>, ApiError> {
    let Query(query) = query?;
    let materials = services
        .materials
        .list_recent(clamp_recent_limit(query.limit))
        .await?;
    Ok(Json(materials.iter().map(MaterialResponse::summary).collect()))
}

async fn handle_get_material(
    State(services): State<Services>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<MaterialResponse>, ApiError> {
    let Path(id) = id?;
    let material = services.materials.get(id).await?;
    Ok(Json(MaterialResponse::detailed(&material)))
}

// ============ /schedules ============

async fn handle_create_schedule(
    State(services): State<Services>,
    payload: Result<Json<CreateSchedule>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(payload) = payload?;
    let schedule = create_schedule(services.schedules.as_ref(), payload).await?;
    Ok(Json(ScheduleResponse::from(&schedule)))
}

#[derive(Deserialize)]
struct ListSchedulesQuery {
    #[serde(default)]
    include_inactive: bool,
}

async fn handle_list_schedules(
    State(services): State<Services>,
    query: Result<Query<ListSchedulesQuery>, QueryRejection>,
) -> Result<Json<Vec<ScheduleResponse>>, ApiError> {
    let Query(query) = query?;
    let schedules = services
        .schedules
        .list_schedules(query.include_inactive)
        .await?;
    Ok(Json(schedules.iter().map(ScheduleResponse::from).collect()))
}

async fn handle_get_schedule(
    State(services): State<Services>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Path(id) = id?;
    let schedule = services.schedules.get_schedule(id).await?;
    Ok(Json(ScheduleResponse::from(&schedule)))
}

async fn handle_cancel_schedule(
    State(services): State<Services>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Path(id) = id?;
    let schedule = cancel_schedule(services.schedules.as_ref(), id).await?;
    Ok(Json(ScheduleResponse::from(&schedule)))
}
