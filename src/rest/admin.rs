//! Admin login, admin roster management and logout.

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use super::{request_token, ApiJson, AppState, MaybePrincipal};
use crate::auth::Principal;
use crate::error::ApiError;
use crate::portal::{Credentials, NewAdmin};

pub(super) async fn admin_login(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<Json<Value>, ApiError> {
    let (token, role) = state.portal.admin_login(creds).await?;
    Ok(Json(json!({ "success": true, "token": token, "role": role })))
}

/// Open while no admin exists so the first one can be created; a
/// superadmin session is required from then on.
pub(super) async fn add_admin(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiJson(new): ApiJson<NewAdmin>,
) -> Result<Json<Value>, ApiError> {
    let actor = match &principal {
        Some(Principal::Admin(admin)) => Some(admin),
        _ => None,
    };
    state.portal.add_admin(actor, new).await?;
    Ok(Json(json!({ "success": true })))
}

/// Revoke the presented token, admin or client.
pub(super) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let token = request_token(&headers).ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    if !state.portal.logout(token) {
        return Err(ApiError::unauthorized("Invalid or expired session"));
    }
    Ok(Json(json!({ "success": true })))
}
