use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use super::{ApiJson, ApiPath, AppState, MaybePrincipal};
use crate::auth::ClientSession;
use crate::error::ApiError;
use crate::models::{Client, Document};
use crate::portal::{ClientCredentials, SaveClient};

pub(super) async fn client_login(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<ClientCredentials>,
) -> Result<Json<Value>, ApiError> {
    let (token, client_id) = state.portal.client_login(creds).await?;
    Ok(Json(json!({ "success": true, "token": token, "clientId": client_id })))
}

pub(super) async fn list_clients(State(state): State<AppState>) -> Result<Json<Vec<Client>>, ApiError> {
    Ok(Json(state.portal.list_clients().await?))
}

pub(super) async fn get_client(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Client>, ApiError> {
    state.authorize_client(&principal, id)?;
    Ok(Json(state.portal.get_client(id).await?))
}

pub(super) async fn save_client(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SaveClient>,
) -> Result<Json<Value>, ApiError> {
    let client = state.portal.save_client(req).await?;
    Ok(Json(json!({ "success": true, "client": client })))
}

/// The signed-in client's own record.
pub(super) async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
) -> Result<Json<Client>, ApiError> {
    Ok(Json(state.portal.get_client(session.id).await?))
}

pub(super) async fn my_documents(
    State(state): State<AppState>,
    Extension(session): Extension<ClientSession>,
) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.portal.client_documents(session.id).await?))
}
