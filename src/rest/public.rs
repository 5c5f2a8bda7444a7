use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::{ApiJson, ApiPath, AppState, MaybePrincipal};
use crate::auth::Principal;
use crate::error::ApiError;
use crate::portal::ContactMessage;

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "success": true }))
}

pub(super) async fn helpers(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.portal.helpers().await?))
}

pub(super) async fn contact(
    State(state): State<AppState>,
    ApiJson(msg): ApiJson<ContactMessage>,
) -> Result<Json<Value>, ApiError> {
    state.portal.contact(msg).await?;
    Ok(Json(json!({ "success": true })))
}

/// Whether a client may read a blob path. Templates are shared; client
/// uploads and signatures belong to one client.
fn client_may_read(client_id: u64, rel: &str) -> bool {
    let mut parts = rel.split('/');
    match (parts.next(), parts.next()) {
        (Some("templates"), _) => true,
        (Some("clients" | "signed"), Some(owner)) => owner == client_id.to_string(),
        _ => false,
    }
}

/// Raw bytes under the upload root, typed by extension.
pub(super) async fn serve_upload(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(path): ApiPath<String>,
) -> Result<Response, ApiError> {
    let rel = path.trim_start_matches('/');
    if state.config.require_client_auth {
        match &principal {
            Some(Principal::Admin(_)) => {}
            Some(Principal::Client(c)) if client_may_read(c.id, rel) => {}
            Some(Principal::Client(_)) => return Err(ApiError::forbidden("Access denied")),
            None => return Err(ApiError::unauthorized("Authentication required")),
        }
    }
    let bytes = state
        .portal
        .blobs()
        .read(rel)
        .await
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    let mime = mime_guess::from_path(rel).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}
