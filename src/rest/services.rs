//! Service catalogue. Reads are public; writes need a superadmin.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{AdminAuth, ApiJson, ApiPath, AppState};
use crate::error::ApiError;
use crate::models::Service;
use crate::portal::ServiceInput;

pub(super) async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<Service>>, ApiError> {
    Ok(Json(state.portal.list_services().await?))
}

pub(super) async fn get_service(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Service>, ApiError> {
    Ok(Json(state.portal.get_service(id).await?))
}

pub(super) async fn create_service(
    State(state): State<AppState>,
    AdminAuth(actor): AdminAuth,
    ApiJson(input): ApiJson<ServiceInput>,
) -> Result<Json<Value>, ApiError> {
    let service = state.portal.create_service(&actor, input).await?;
    Ok(Json(json!({ "success": true, "service": service })))
}

pub(super) async fn update_service(
    State(state): State<AppState>,
    AdminAuth(actor): AdminAuth,
    ApiPath(id): ApiPath<u64>,
    ApiJson(input): ApiJson<ServiceInput>,
) -> Result<Json<Value>, ApiError> {
    let service = state.portal.update_service(&actor, id, input).await?;
    Ok(Json(json!({ "success": true, "service": service })))
}

pub(super) async fn delete_service(
    State(state): State<AppState>,
    AdminAuth(actor): AdminAuth,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Value>, ApiError> {
    state.portal.delete_service(&actor, id).await?;
    Ok(Json(json!({ "success": true })))
}
