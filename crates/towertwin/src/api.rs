use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use towertwin_pipeline::{parse_coordinate, PipelineError, UploadRequest, UserSession};
use towertwin_repository::{RepositoryError, SiteRepository};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sites", get(list_sites).post(create_site))
        .route("/api/sites/{id}", get(get_site))
        .route("/api/sites/{id}/retry", post(retry_site))
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
    stage: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            stage: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message, "stage": self.stage }));
        (self.status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation(_) | PipelineError::MissingSource(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::Persistence(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
            stage: Some(err.stage().as_str()),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("site not found: {id}"))
            }
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// Pulls the caller identity from the request headers. Token verification
/// is the identity service's concern; the API only requires both values to
/// be present.
fn session_from_headers(headers: &HeaderMap) -> Result<UserSession, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    let user_id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid x-user-id"))?;

    Ok(UserSession::new(user_id, token))
}

async fn health() -> &'static str {
    "ok"
}

async fn create_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_from_headers(&headers)?;

    let mut site_name = None;
    let mut location = None;
    let mut latitude = None;
    let mut longitude = None;
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => site_name = Some(read_text(field).await?),
            "location" => {
                let text = read_text(field).await?;
                if !text.trim().is_empty() {
                    location = Some(text);
                }
            }
            "latitude" => latitude = parse_coordinate(&read_text(field).await?),
            "longitude" => longitude = parse_coordinate(&read_text(field).await?),
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "file part lacks a filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
                file = Some((file_name, bytes));
            }
            _ => {}
        }
    }

    let site_name =
        site_name.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing 'name' field"))?;
    let (file_name, contents) =
        file.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing 'file' field"))?;

    let request = UploadRequest {
        site_name,
        location,
        latitude,
        longitude,
        file_name,
        contents,
    };

    let site = state
        .pipeline
        .run_upload(&session, request)
        .await
        .map_err(|err| {
            error!(stage = %err.stage(), error = %err, "upload pipeline failed");
            ApiError::from(err)
        })?;
    Ok((StatusCode::CREATED, Json(site)))
}

async fn retry_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_from_headers(&headers)?;
    let site = state
        .pipeline
        .run_retry(&session, id)
        .await
        .map_err(|err| {
            error!(site_id = %id, stage = %err.stage(), error = %err, "retry pipeline failed");
            ApiError::from(err)
        })?;
    Ok(Json(site))
}

async fn list_sites(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let sites = state.repository.list().await?;
    Ok(Json(sites))
}

async fn get_site(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let site = state.repository.fetch(id).await?;
    Ok(Json(site))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))
}
