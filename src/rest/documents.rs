//! Templates, client documents and the signing workflow.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{ApiJson, ApiPath, AppState, MaybePrincipal};
use crate::auth::Principal;
use crate::error::ApiError;
use crate::models::{Document, Template};
use crate::portal::{parse_year, AssignTemplate, EditTemplate, Upload};

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendForSignature {
    pub client_email: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignRequest {
    pub signature_data_url: Option<String>,
}

/// Multipart form with one `file` part and any number of text fields.
struct UploadForm {
    file: Option<Upload>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, ApiError> {
        let mut multipart = multipart.map_err(|_| ApiError::validation("No file uploaded"))?;
        let mut form = UploadForm {
            file: None,
            fields: HashMap::new(),
        };
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| ApiError::validation(e.body_text()))?;
                form.file = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            } else {
                let text = field.text().await.map_err(|e| ApiError::validation(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn take_file(&mut self) -> Result<Upload, ApiError> {
        self.file.take().ok_or_else(|| ApiError::validation("No file uploaded"))
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

pub(super) async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>, ApiError> {
    Ok(Json(state.portal.list_templates().await?))
}

pub(super) async fn upload_template(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let template = state.portal.upload_template(form.take_file()?).await?;
    Ok(Json(json!({ "success": true, "template": template })))
}

pub(super) async fn edit_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(edit): ApiJson<EditTemplate>,
) -> Result<Json<Value>, ApiError> {
    let template = state.portal.edit_template(id, edit).await?;
    Ok(Json(json!({ "success": true, "template": template })))
}

pub(super) async fn assign_template(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<AssignTemplate>,
) -> Result<Json<Value>, ApiError> {
    let document = state.portal.assign_template(id, req).await?;
    Ok(Json(json!({ "success": true, "document": document })))
}

pub(super) async fn send_for_signature(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<SendForSignature>,
) -> Result<Json<Value>, ApiError> {
    let base_url = state.public_base_url(&headers);
    state.portal.send_for_signature(id, req.client_email, &base_url).await?;
    Ok(Json(json!({ "success": true })))
}

/// Every document across clients. Admin-only once client auth is required.
pub(super) async fn list_documents(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
) -> Result<Json<Vec<Document>>, ApiError> {
    if state.config.require_client_auth && !matches!(principal, Some(Principal::Admin(_))) {
        return Err(ApiError::unauthorized("Admin auth required"));
    }
    Ok(Json(state.portal.list_documents().await?))
}

pub(super) async fn get_document(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(id): ApiPath<u64>,
) -> Result<Json<Document>, ApiError> {
    let document = state.portal.get_document(id).await?;
    state.authorize_client(&principal, document.client_id)?;
    Ok(Json(document))
}

pub(super) async fn client_documents(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(client_id): ApiPath<u64>,
) -> Result<Json<Vec<Document>>, ApiError> {
    state.authorize_client(&principal, client_id)?;
    Ok(Json(state.portal.client_documents(client_id).await?))
}

pub(super) async fn upload_document(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(client_id): ApiPath<u64>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    state.authorize_client(&principal, client_id)?;
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.take_file()?;
    let year = parse_year(form.field("year"))?;
    let doc_type = form.field("type").map(str::to_string);
    let document = state.portal.upload_document(client_id, upload, doc_type, year).await?;
    Ok(Json(json!({ "success": true, "document": document })))
}

pub(super) async fn sign_document(
    State(state): State<AppState>,
    MaybePrincipal(principal): MaybePrincipal,
    ApiPath(id): ApiPath<u64>,
    ApiJson(req): ApiJson<SignRequest>,
) -> Result<Json<Value>, ApiError> {
    if state.config.require_client_auth {
        let document = state.portal.get_document(id).await?;
        state.authorize_client(&principal, document.client_id)?;
    }
    let document = state.portal.sign_document(id, req.signature_data_url).await?;
    Ok(Json(json!({ "success": true, "document": document })))
}
