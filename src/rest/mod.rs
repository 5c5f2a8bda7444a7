//! REST API layer using Axum.
//!
//! JSON endpoints for the admin dashboard and the client portal, plus the
//! `/uploads/**` file route. Handlers stay thin and delegate to [`Portal`].
//! Admin-only routes sit behind [`require_admin`]; routes mixing public reads
//! and privileged writes use the [`AdminAuth`] extractor instead.

mod admin;
mod clients;
mod documents;
mod public;
mod services;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{header, request::Parts, HeaderMap},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::auth::{bearer_token, AdminSession, Principal};
use crate::config::Config;
use crate::error::ApiError;
use crate::portal::Portal;

/// Shared app state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<Portal>,
    pub config: Arc<Config>,
}

impl AppState {
    fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        let token = request_token(headers)?;
        self.portal.resolve(token)
    }

    /// Gate for client-scoped records. Open unless client auth is required,
    /// in which case an admin or the owning client must be signed in.
    fn authorize_client(&self, principal: &Option<Principal>, client_id: u64) -> Result<(), ApiError> {
        if !self.config.require_client_auth {
            return Ok(());
        }
        match principal {
            Some(Principal::Admin(_)) => Ok(()),
            Some(Principal::Client(c)) if c.id == client_id => Ok(()),
            Some(Principal::Client(_)) => Err(ApiError::forbidden("Access denied")),
            None => Err(ApiError::unauthorized("Authentication required")),
        }
    }

    /// Base URL for links sent by mail.
    fn public_base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.config.public_base_url {
            return base.clone();
        }
        headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|host| format!("http://{}", host))
            .unwrap_or_else(|| format!("http://localhost:{}", self.config.port))
    }
}

fn request_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

async fn require_admin(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    match state.principal(req.headers()) {
        Some(Principal::Admin(admin)) => {
            req.extensions_mut().insert(admin);
            Ok(next.run(req).await)
        }
        _ => Err(ApiError::unauthorized("Admin auth required")),
    }
}

async fn require_client(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    match state.principal(req.headers()) {
        Some(Principal::Client(client)) => {
            req.extensions_mut().insert(client);
            Ok(next.run(req).await)
        }
        _ => Err(ApiError::unauthorized("Client auth required")),
    }
}

/// Admin session resolved from the bearer token.
pub struct AdminAuth(pub AdminSession);

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(admin) = parts.extensions.get::<AdminSession>() {
            return Ok(AdminAuth(admin.clone()));
        }
        match state.principal(&parts.headers) {
            Some(Principal::Admin(admin)) => Ok(AdminAuth(admin)),
            _ => Err(ApiError::unauthorized("Admin auth required")),
        }
    }
}

/// Whatever principal the request carries, if any. Never rejects.
pub struct MaybePrincipal(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<AppState> for MaybePrincipal {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(state.principal(&parts.headers)))
    }
}

/// `Json` whose rejections render as `{"error": ...}`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| ApiError::validation(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Path` whose rejections render as `{"error": ...}`.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: PathRejection| ApiError::validation(e.body_text()))?;
        Ok(ApiPath(value))
    }
}

/// Create the Axum router with all portal endpoints.
pub fn create_router(portal: Arc<Portal>, config: Arc<Config>) -> Router {
    let body_limit = config.body_limit;
    let state = AppState { portal, config };

    let admin_routes = Router::new()
        .route("/api/clients", get(clients::list_clients))
        .route("/api/admin/clients/save", post(clients::save_client))
        .route("/api/templates", get(documents::list_templates))
        .route("/api/templates/upload", post(documents::upload_template))
        .route("/api/templates/:id/edit", post(documents::edit_template))
        .route(
            "/api/admin/templates/:id/assign-to-client",
            post(documents::assign_template),
        )
        .route(
            "/api/admin/documents/:id/send-for-signature",
            post(documents::send_for_signature),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let client_routes = Router::new()
        .route("/api/client/me", get(clients::me))
        .route("/api/client/documents", get(clients::my_documents))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_client));

    Router::new()
        .route("/health", get(public::health))
        .route("/api/admin/login", post(admin::admin_login))
        .route("/api/admin/add-admin", post(admin::add_admin))
        .route("/api/client/login", post(clients::client_login))
        .route("/api/logout", post(admin::logout))
        .route("/api/clients/:id", get(clients::get_client))
        .route("/api/clients/:id/documents", get(documents::client_documents))
        .route("/api/clients/:id/upload", post(documents::upload_document))
        .route("/api/documents", get(documents::list_documents))
        .route("/api/documents/:id", get(documents::get_document))
        .route("/api/documents/:id/sign", post(documents::sign_document))
        .route("/api/services", get(services::list_services).post(services::create_service))
        .route("/api/services/add", post(services::create_service))
        .route(
            "/api/services/:id",
            get(services::get_service)
                .put(services::update_service)
                .post(services::update_service)
                .delete(services::delete_service),
        )
        .route("/api/helpers", get(public::helpers))
        .route("/api/contact", post(public::contact))
        .route("/uploads/*path", get(public::serve_upload))
        .merge(admin_routes)
        .merge(client_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
