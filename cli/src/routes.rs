// HTTP Routes
//
// Thin axum layer over `CatService`: request binding, validation and
// status-code mapping.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use catshelter_kernel::{
    CatId, CatRecord, CatService, ConsumerState, ConsumerStatus, NewCat, RepositoryError,
    ServiceError,
};

pub fn router(service: CatService) -> Router {
    let cats = Router::new()
        .route("/cat", post(create_cat))
        .route("/cat/", post(create_cat))
        .route("/cat/:id", get(get_cat).put(update_cat).delete(delete_cat));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", cats)
        .with_state(service)
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("could not find cat {id}"))
            }
            ServiceError::Repository(RepositoryError::AlreadyExists(id)) => {
                Self::new(StatusCode::CONFLICT, format!("cat {id} already exists"))
            }
            other => {
                tracing::error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CatRequest {
    #[serde(default)]
    name: String,
    age: Option<u32>,
    #[serde(default)]
    vaccinated: bool,
}

impl CatRequest {
    fn validate(self) -> ApiResult<NewCat> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ApiError::unprocessable("name is required"));
        }
        let age = self
            .age
            .ok_or_else(|| ApiError::unprocessable("age is required"))?;

        Ok(NewCat {
            name: name.to_string(),
            age,
            vaccinated: self.vaccinated,
        })
    }
}

fn parse_id(raw: &str) -> ApiResult<CatId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid cat id `{raw}`")))
}

fn bind(payload: Result<Json<CatRequest>, JsonRejection>) -> ApiResult<NewCat> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(%rejection, "bind failed");
        ApiError::bad_request(rejection.body_text())
    })?;
    request.validate()
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /v1/cat - Create a cat
async fn create_cat(
    State(service): State<CatService>,
    payload: Result<Json<CatRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CatRecord>)> {
    let cat = bind(payload)?;
    let created = service.create(cat).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/cat/:id - Fetch a cat, served from the cache when possible
async fn get_cat(
    State(service): State<CatService>,
    Path(id): Path<String>,
) -> ApiResult<Json<CatRecord>> {
    let id = parse_id(&id)?;
    Ok(Json(service.get(id).await?))
}

/// PUT /v1/cat/:id - Replace a cat
async fn update_cat(
    State(service): State<CatService>,
    Path(id): Path<String>,
    payload: Result<Json<CatRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CatRecord>)> {
    let id = parse_id(&id)?;
    let cat = bind(payload)?.with_id(id);
    let updated = service.update(cat).await?;
    Ok((StatusCode::CREATED, Json(updated)))
}

/// DELETE /v1/cat/:id - Remove a cat
async fn delete_cat(
    State(service): State<CatService>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_id(&id)?;
    service.delete(id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    consumer: ConsumerStatus,
    cached: usize,
}

/// GET /health - Cache consumer status
async fn health(State(service): State<CatService>) -> impl IntoResponse {
    let consumer = service.cache().status();
    let (code, status) = match consumer.state {
        ConsumerState::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "stopped"),
        ConsumerState::ErrorBackoff => (StatusCode::OK, "degraded"),
        _ => (StatusCode::OK, "ok"),
    };
    let body = HealthResponse {
        status,
        consumer,
        cached: service.cache().len(),
    };
    (code, Json(body))
}
