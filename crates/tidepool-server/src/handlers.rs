//! HTTP handlers: thin glue between axum and the stream service.
//!
//! The caller's identity arrives in the `x-tidepool-user` header, placed
//! there by the session layer in front of this server.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use tidepool_core::{Error, ListRequest, SetReadRequest, StatusId};

use crate::AppState;

/// Error wrapper mapping domain errors onto HTTP status codes.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Empty
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Request(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

fn current_user(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-tidepool-user")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| ApiError(Error::NotFound("no authenticated user".to_string())))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListRequest>,
) -> Result<Response, ApiError> {
    let user_id = current_user(&headers)?;
    let response = state.service.list(user_id, req).await?;
    Ok(Json(response).into_response())
}

pub async fn set_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetReadRequest>,
) -> Result<Response, ApiError> {
    let user_id = current_user(&headers)?;
    let info = state
        .service
        .set_read(user_id, req.stream_id, req.last_read, req.mode)
        .await?;
    Ok(Json(info).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub stream_id: Uuid,
}

pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<FetchParams>,
) -> Result<Response, ApiError> {
    let user_id = current_user(&headers)?;
    let response = state.service.fetch(user_id, params.stream_id).await?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub status_id: String,
}

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let user_id = current_user(&headers)?;
    let results = state
        .service
        .search(user_id, &StatusId::from(params.status_id))
        .await?;
    Ok(Json(results).into_response())
}

pub async fn healthz() -> &'static str {
    "ok"
}
