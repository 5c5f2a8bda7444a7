//! Client, template and document workflow.
//!
//! `Portal` composes the record store, blob store, session registry and mail
//! relay. Each operation loads the collections it needs, applies one change and
//! writes the collection back. Blobs are written before the metadata that
//! references them is committed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{
    hash_password, verify_password, AdminSession, ClientSession, Principal, SessionRegistry,
};
use crate::blobs::{BlobCategory, BlobStore};
use crate::error::{upstream, ApiError, OptionExt};
use crate::mail::{Email, Mailer};
use crate::models::{
    next_id, Admin, AdminRoster, Client, Document, Role, Service, Signature, Template,
};
use crate::storage::{Collection, RecordStore};

/// An uploaded file as received from a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct ClientCredentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct NewAdmin {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Create-or-update payload. Empty strings, zero and absent values all mean
/// "leave unchanged".
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveClient {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub id: Option<u64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub ssn: Option<String>,
    pub driver_license: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub year: Option<i32>,
    pub services: Option<Vec<String>>,
    pub authorized: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
pub struct EditTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssignTemplate {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub client_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub year: Option<i32>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServiceInput {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ContactMessage {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    use serde::de::Error;
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| D::Error::custom("expected a non-negative integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
        Some(_) => Err(D::Error::custom("expected a number")),
    }
}

fn lenient_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    use serde::de::Error;
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected an integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
        Some(_) => Err(D::Error::custom("expected a number")),
    }
}

/// Non-empty string or nothing.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn current_year() -> i32 {
    Utc::now().year()
}

/// Parse a multipart `year` field; empty means the current year.
pub fn parse_year(raw: Option<&str>) -> Result<i32, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(current_year()),
        Some(s) => s
            .parse::<i32>()
            .ok()
            .filter(|y| *y != 0)
            .ok_or_else(|| ApiError::validation("Invalid year")),
    }
}

fn superadmin_in(roster: &AdminRoster, actor: Option<&AdminSession>) -> Result<(), ApiError> {
    let actor = actor.ok_or_else(|| ApiError::unauthorized("Admin auth required"))?;
    match roster.find(&actor.email) {
        Some(admin) if admin.role == Role::Superadmin => Ok(()),
        _ => Err(ApiError::forbidden("Superadmin access required")),
    }
}

/// bcrypt on the blocking pool so request workers keep running.
async fn hash_secret(secret: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&secret))
        .await
        .map_err(ApiError::internal)?
        .map_err(ApiError::from)
}

async fn verify_secret(secret: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&secret, &hash))
        .await
        .map_err(ApiError::internal)
}

async fn hash_optional(secret: Option<String>) -> Result<Option<String>, ApiError> {
    match present(secret) {
        Some(secret) => hash_secret(secret).await.map(Some),
        None => Ok(None),
    }
}

/// Payload of a `data:<mime>;base64,<payload>` URL.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, ApiError> {
    let invalid = || ApiError::validation("Invalid signature data");
    let payload = data_url.split(',').nth(1).ok_or_else(invalid)?;
    let bytes = STANDARD.decode(payload.trim()).map_err(|_| invalid())?;
    if bytes.is_empty() {
        return Err(invalid());
    }
    Ok(bytes)
}

pub struct Portal {
    store: RecordStore,
    blobs: BlobStore,
    sessions: SessionRegistry,
    mailer: Arc<dyn Mailer>,
    mail_from: String,
    contact_email: String,
}

impl Portal {
    pub fn new(
        store: RecordStore,
        blobs: BlobStore,
        sessions: SessionRegistry,
        mailer: Arc<dyn Mailer>,
        mail_from: impl Into<String>,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blobs,
            sessions,
            mailer,
            mail_from: mail_from.into(),
            contact_email: contact_email.into(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    // --- Sessions ---

    pub fn resolve(&self, token: &str) -> Option<Principal> {
        self.sessions.resolve(token)
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.revoke(token)
    }

    // --- Admins ---

    /// An unknown email is a 404; the admin UI treats that as the cue to
    /// create the first admin.
    pub async fn admin_login(&self, creds: Credentials) -> Result<(String, Role), ApiError> {
        let roster: AdminRoster = self.store.read_or_default(Collection::Admins).await?;
        let admin = roster.find(&creds.email).or_not_found("Admin not found")?;
        if !verify_secret(creds.password, admin.password_hash.clone()).await? {
            warn!(email = %creds.email, "admin login rejected");
            return Err(ApiError::unauthorized("Invalid password"));
        }
        let token = self.sessions.create(Principal::Admin(AdminSession {
            email: admin.email.clone(),
            role: admin.role,
        }));
        info!(email = %admin.email, role = admin.role.as_str(), "admin logged in");
        Ok((token, admin.role))
    }

    /// Superadmin check against the current roster, not the role captured at
    /// login.
    pub async fn require_superadmin(&self, actor: &AdminSession) -> Result<(), ApiError> {
        let roster: AdminRoster = self.store.read_or_default(Collection::Admins).await?;
        superadmin_in(&roster, Some(actor))
    }

    /// Add an admin. While the roster is empty anyone may do this and the
    /// new admin is a superadmin; afterwards a current superadmin is needed.
    pub async fn add_admin(&self, actor: Option<&AdminSession>, new: NewAdmin) -> Result<(), ApiError> {
        // turn away unauthorized callers before paying for bcrypt
        let roster: AdminRoster = self.store.read_or_default(Collection::Admins).await?;
        if !roster.admins.is_empty() {
            superadmin_in(&roster, actor)?;
        }
        if new.email.is_empty() || new.password.is_empty() {
            return Err(ApiError::validation("Email and password are required"));
        }
        let password_hash = hash_secret(new.password).await?;

        // emptiness decided again under the lock; a racing setup request loses
        let mut roster = self.store.lock::<AdminRoster>(Collection::Admins).await?;
        let role = if roster.admins.is_empty() {
            Role::Superadmin
        } else {
            superadmin_in(&roster, actor)?;
            new.role.unwrap_or(Role::Admin)
        };
        if roster.find(&new.email).is_some() {
            return Err(ApiError::conflict("Admin already exists"));
        }
        roster.admins.push(Admin {
            email: new.email.clone(),
            password_hash,
            role,
        });
        roster.commit().await?;
        let by = actor.map_or("setup", |a| a.email.as_str());
        info!(%by, email = %new.email, role = role.as_str(), "admin added");
        Ok(())
    }

    /// Create the first superadmin when the roster is empty. Returns whether
    /// one was created.
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> Result<bool, ApiError> {
        if email.is_empty() || password.is_empty() {
            return Err(ApiError::validation("Email and password are required"));
        }
        let password_hash = hash_secret(password.to_string()).await?;
        let mut roster = self.store.lock::<AdminRoster>(Collection::Admins).await?;
        if !roster.admins.is_empty() {
            return Ok(false);
        }
        roster.admins.push(Admin {
            email: email.to_string(),
            password_hash,
            role: Role::Superadmin,
        });
        roster.commit().await?;
        info!(%email, "bootstrap superadmin created");
        Ok(true)
    }

    // --- Clients ---

    pub async fn client_login(&self, creds: ClientCredentials) -> Result<(String, u64), ApiError> {
        let clients: Vec<Client> = self.store.read_or_default(Collection::Clients).await?;
        let client = clients
            .iter()
            .find(|c| c.email == creds.email)
            .or_not_found("Client not found")?;
        if !client.authorized {
            return Err(ApiError::forbidden("Access disabled"));
        }
        if client.phone != creds.phone {
            return Err(ApiError::unauthorized("Phone mismatch"));
        }
        if !verify_secret(creds.password, client.password_hash.clone()).await? {
            warn!(client_id = client.id, "client login rejected");
            return Err(ApiError::unauthorized("Invalid password"));
        }
        let token = self.sessions.create(Principal::Client(ClientSession {
            id: client.id,
            email: client.email.clone(),
        }));
        info!(client_id = client.id, "client logged in");
        Ok((token, client.id))
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>, ApiError> {
        Ok(self.store.read_or_default(Collection::Clients).await?)
    }

    pub async fn get_client(&self, id: u64) -> Result<Client, ApiError> {
        let clients: Vec<Client> = self.store.read_or_default(Collection::Clients).await?;
        clients.into_iter().find(|c| c.id == id).or_not_found("Client not found")
    }

    pub async fn save_client(&self, req: SaveClient) -> Result<Client, ApiError> {
        // bcrypt is slow; hash before taking the collection lock
        let password_hash = hash_optional(req.password).await?;
        let ssn_hash = hash_optional(req.ssn).await?;
        let driver_license_hash = hash_optional(req.driver_license).await?;

        let mut clients = self.store.lock::<Vec<Client>>(Collection::Clients).await?;

        let client = match req.id.filter(|id| *id != 0) {
            Some(id) => {
                let client = clients.iter_mut().find(|c| c.id == id).or_not_found("Client not found")?;
                if let Some(name) = present(req.name) {
                    client.name = name;
                }
                if let Some(email) = present(req.email) {
                    client.email = email;
                }
                if let Some(phone) = present(req.phone) {
                    client.phone = phone;
                }
                if let Some(authorized) = req.authorized {
                    client.authorized = authorized;
                }
                if let Some(status) = present(req.status) {
                    client.status = status;
                }
                if let Some(year) = req.year.filter(|y| *y != 0) {
                    client.year = year;
                }
                if let Some(services) = req.services {
                    client.services = services;
                }
                if let Some(hash) = password_hash {
                    client.password_hash = hash;
                }
                if let Some(hash) = ssn_hash {
                    client.ssn_hash = hash;
                }
                if let Some(hash) = driver_license_hash {
                    client.driver_license_hash = hash;
                }
                client.clone()
            }
            None => {
                let name = present(req.name);
                let email = present(req.email);
                let (Some(name), Some(email)) = (name, email) else {
                    return Err(ApiError::validation("Name and email are required"));
                };
                let client = Client {
                    id: next_id(&clients),
                    name,
                    email,
                    phone: req.phone.unwrap_or_default(),
                    password_hash: password_hash.unwrap_or_default(),
                    ssn_hash: ssn_hash.unwrap_or_default(),
                    driver_license_hash: driver_license_hash.unwrap_or_default(),
                    status: present(req.status).unwrap_or_else(|| "New".to_string()),
                    year: req.year.filter(|y| *y != 0).unwrap_or_else(current_year),
                    services: req.services.unwrap_or_default(),
                    authorized: req.authorized.unwrap_or(true),
                };
                clients.push(client.clone());
                client
            }
        };

        clients.commit().await?;
        info!(client_id = client.id, "client saved");
        Ok(client)
    }

    // --- Templates ---

    pub async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        Ok(self.store.read_or_default(Collection::Templates).await?)
    }

    pub async fn upload_template(&self, upload: Upload) -> Result<Template, ApiError> {
        let mut templates = self.store.lock::<Vec<Template>>(Collection::Templates).await?;
        let id = next_id(&templates);
        let filename = self
            .blobs
            .save(BlobCategory::Template { template_id: id }, &upload.file_name, &upload.bytes)
            .await?;
        let now = Utc::now();
        let template = Template {
            id,
            name: upload.file_name.clone(),
            description: String::new(),
            filename,
            original_name: upload.file_name,
            created_at: now,
            updated_at: now,
        };
        templates.push(template.clone());
        templates.commit().await?;
        info!(template_id = id, "template uploaded");
        Ok(template)
    }

    pub async fn edit_template(&self, id: u64, edit: EditTemplate) -> Result<Template, ApiError> {
        let mut templates = self.store.lock::<Vec<Template>>(Collection::Templates).await?;
        let template = templates.iter_mut().find(|t| t.id == id).or_not_found("Template not found")?;
        if let Some(name) = present(edit.name) {
            template.name = name;
        }
        if let Some(description) = present(edit.description) {
            template.description = description;
        }
        template.updated_at = Utc::now();
        let template = template.clone();
        templates.commit().await?;
        Ok(template)
    }

    // --- Documents ---

    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        Ok(self.store.read_or_default(Collection::Documents).await?)
    }

    pub async fn get_document(&self, id: u64) -> Result<Document, ApiError> {
        let docs: Vec<Document> = self.store.read_or_default(Collection::Documents).await?;
        docs.into_iter().find(|d| d.id == id).or_not_found("Document not found")
    }

    pub async fn client_documents(&self, client_id: u64) -> Result<Vec<Document>, ApiError> {
        let docs: Vec<Document> = self.store.read_or_default(Collection::Documents).await?;
        Ok(docs.into_iter().filter(|d| d.client_id == client_id).collect())
    }

    pub async fn upload_document(
        &self,
        client_id: u64,
        upload: Upload,
        doc_type: Option<String>,
        year: i32,
    ) -> Result<Document, ApiError> {
        self.get_client(client_id).await?;
        // blob first; the document lock is only taken for the append
        let filename = self
            .blobs
            .save(BlobCategory::ClientUpload { client_id, year }, &upload.file_name, &upload.bytes)
            .await?;

        let mut docs = self.store.lock::<Vec<Document>>(Collection::Documents).await?;
        let doc = Document {
            id: next_id(&docs),
            client_id,
            template_id: None,
            year,
            doc_type: present(doc_type).unwrap_or_else(|| "Other".to_string()),
            filename,
            original_name: upload.file_name,
            uploaded_at: Utc::now(),
            signature: None,
        };
        docs.push(doc.clone());
        docs.commit().await?;
        info!(document_id = doc.id, client_id, "document uploaded");
        Ok(doc)
    }

    /// New client document pointing at the template's stored file. The bytes
    /// are shared, not copied.
    pub async fn assign_template(&self, template_id: u64, req: AssignTemplate) -> Result<Document, ApiError> {
        let client_id = req.client_id.ok_or_else(|| ApiError::validation("clientId is required"))?;
        let templates: Vec<Template> = self.store.read_or_default(Collection::Templates).await?;
        let template = templates
            .into_iter()
            .find(|t| t.id == template_id)
            .or_not_found("Template not found")?;
        self.get_client(client_id).await?;

        let mut docs = self.store.lock::<Vec<Document>>(Collection::Documents).await?;
        let doc = Document {
            id: next_id(&docs),
            client_id,
            template_id: Some(template_id),
            year: req.year.filter(|y| *y != 0).unwrap_or_else(current_year),
            doc_type: present(req.doc_type).unwrap_or_else(|| template.name.clone()),
            filename: template.filename,
            original_name: template.original_name,
            uploaded_at: Utc::now(),
            signature: None,
        };
        docs.push(doc.clone());
        docs.commit().await?;
        info!(document_id = doc.id, template_id, client_id, "template assigned");
        Ok(doc)
    }

    /// Email the client a signing link for `document_id`.
    pub async fn send_for_signature(
        &self,
        document_id: u64,
        client_email: Option<String>,
        base_url: &str,
    ) -> Result<(), ApiError> {
        let client_email = present(client_email).ok_or_else(|| ApiError::validation("clientEmail is required"))?;
        let doc = self.get_document(document_id).await?;
        let clients: Vec<Client> = self.store.read_or_default(Collection::Clients).await?;
        clients
            .iter()
            .find(|c| c.email == client_email)
            .or_not_found("Client not found")?;

        let sign_url = format!("{}/client-sign.html?docId={}", base_url.trim_end_matches('/'), doc.id);
        let email = Email::signature_request(&self.mail_from, &client_email, &sign_url);
        self.mailer
            .send(email)
            .await
            .map_err(|e| upstream(e, "Failed to send email"))?;
        info!(document_id = doc.id, "signature request sent");
        Ok(())
    }

    /// Store a signature image and stamp the document. A repeat signature
    /// replaces the previous one.
    pub async fn sign_document(&self, document_id: u64, data_url: Option<String>) -> Result<Document, ApiError> {
        let data_url = present(data_url).ok_or_else(|| ApiError::validation("signatureDataUrl is required"))?;
        let image = decode_data_url(&data_url)?;

        let mut docs = self.store.lock::<Vec<Document>>(Collection::Documents).await?;
        let doc = docs.iter_mut().find(|d| d.id == document_id).or_not_found("Document not found")?;
        let signed_file = self
            .blobs
            .save(
                BlobCategory::Signature {
                    client_id: doc.client_id,
                    document_id,
                },
                "signature.png",
                &image,
            )
            .await?;
        doc.signature = Some(Signature {
            signed_file,
            signed_at: Utc::now(),
        });
        let doc = doc.clone();
        docs.commit().await?;
        info!(document_id, client_id = doc.client_id, "document signed");
        Ok(doc)
    }

    // --- Services ---

    pub async fn list_services(&self) -> Result<Vec<Service>, ApiError> {
        Ok(self.store.read_or_default(Collection::Services).await?)
    }

    pub async fn get_service(&self, id: u64) -> Result<Service, ApiError> {
        let services = self.list_services().await?;
        services.into_iter().find(|s| s.id == id).or_not_found("Service not found")
    }

    pub async fn create_service(&self, actor: &AdminSession, input: ServiceInput) -> Result<Service, ApiError> {
        self.require_superadmin(actor).await?;
        let name = present(input.name).ok_or_else(|| ApiError::validation("Service name is required"))?;
        let mut services = self.store.lock::<Vec<Service>>(Collection::Services).await?;
        let service = Service {
            id: next_id(&services),
            name,
            description: input.description.unwrap_or_default(),
        };
        services.push(service.clone());
        services.commit().await?;
        info!(service_id = service.id, by = %actor.email, "service created");
        Ok(service)
    }

    pub async fn update_service(&self, actor: &AdminSession, id: u64, input: ServiceInput) -> Result<Service, ApiError> {
        self.require_superadmin(actor).await?;
        let mut services = self.store.lock::<Vec<Service>>(Collection::Services).await?;
        let service = services.iter_mut().find(|s| s.id == id).or_not_found("Service not found")?;
        if let Some(name) = present(input.name) {
            service.name = name;
        }
        if let Some(description) = present(input.description) {
            service.description = description;
        }
        let service = service.clone();
        services.commit().await?;
        info!(service_id = id, by = %actor.email, "service updated");
        Ok(service)
    }

    pub async fn delete_service(&self, actor: &AdminSession, id: u64) -> Result<(), ApiError> {
        self.require_superadmin(actor).await?;
        let mut services = self.store.lock::<Vec<Service>>(Collection::Services).await?;
        let before = services.len();
        services.retain(|s| s.id != id);
        if services.len() == before {
            return Err(ApiError::not_found("Service not found"));
        }
        services.commit().await?;
        info!(service_id = id, by = %actor.email, "service deleted");
        Ok(())
    }

    // --- Public content ---

    /// Upload hints shown in the client portal, served as stored.
    pub async fn helpers(&self) -> Result<Vec<Value>, ApiError> {
        Ok(self.store.read_or_default(Collection::Helpers).await?)
    }

    pub async fn contact(&self, msg: ContactMessage) -> Result<(), ApiError> {
        let (Some(name), Some(email), Some(message)) = (present(msg.name), present(msg.email), present(msg.message))
        else {
            return Err(ApiError::validation("Name, email and message are required"));
        };
        let email = Email::contact(&name, &email, &message, &self.contact_email);
        self.mailer
            .send(email)
            .await
            .map_err(|e| upstream(e, "Failed to send message"))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mail::testing::RecordingMailer;
    use tempfile::TempDir;

    pub(crate) async fn portal_with(mailer: Arc<dyn Mailer>) -> (Portal, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("data")).await.unwrap();
        let blobs = BlobStore::open(dir.path().join("uploads")).await.unwrap();
        let portal = Portal::new(
            store,
            blobs,
            SessionRegistry::new(None),
            mailer,
            "no-reply@solidifiedtaxgroup.com",
            "info@solidifiedtaxgroup.com",
        );
        (portal, dir)
    }

    async fn portal() -> (Portal, TempDir) {
        portal_with(Arc::new(RecordingMailer::default())).await
    }

    fn new_client(name: &str, email: &str, phone: &str, password: &str) -> SaveClient {
        SaveClient {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            phone: Some(phone.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            file_name: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn new_client_gets_defaults_and_hashed_secrets() {
        let (portal, _dir) = portal().await;
        let mut req = new_client("Ada", "ada@example.com", "555-1212", "pw");
        req.ssn = Some("123-45-6789".to_string());
        let client = portal.save_client(req).await.unwrap();

        assert_eq!(client.id, 1);
        assert_eq!(client.status, "New");
        assert_eq!(client.year, current_year());
        assert!(client.services.is_empty());
        assert!(client.authorized);
        assert!(verify_password("pw", &client.password_hash));
        assert!(verify_password("123-45-6789", &client.ssn_hash));
        assert!(client.driver_license_hash.is_empty());

        let raw = std::fs::read_to_string(portal.store().dir().join("clients.json")).unwrap();
        assert!(!raw.contains("123-45-6789"));
    }

    #[tokio::test]
    async fn create_requires_name_and_email() {
        let (portal, _dir) = portal().await;
        let err = portal
            .save_client(SaveClient {
                name: Some("No Email".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn partial_save_only_touches_given_fields() {
        let (portal, _dir) = portal().await;
        let created = portal
            .save_client(new_client("Ada", "ada@example.com", "555-1212", "pw"))
            .await
            .unwrap();

        let updated = portal
            .save_client(SaveClient {
                id: Some(created.id),
                status: Some("In Review".to_string()),
                name: Some(String::new()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, "In Review");
        assert_eq!(updated.name, "Ada");
        assert_eq!(updated.email, created.email);
        assert_eq!(updated.phone, created.phone);
        assert_eq!(updated.password_hash, created.password_hash);
        assert_eq!(updated.year, created.year);
        assert_eq!(updated.authorized, created.authorized);
    }

    #[tokio::test]
    async fn update_of_missing_client_is_not_found() {
        let (portal, _dir) = portal().await;
        let err = portal
            .save_client(SaveClient {
                id: Some(42),
                status: Some("Done".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::not_found("Client not found"));
    }

    #[tokio::test]
    async fn client_ids_follow_max_not_count() {
        let (portal, _dir) = portal().await;
        let existing = vec![Client {
            id: 9,
            name: "Old".to_string(),
            email: "old@example.com".to_string(),
            phone: String::new(),
            password_hash: String::new(),
            ssn_hash: String::new(),
            driver_license_hash: String::new(),
            status: "Done".to_string(),
            year: 2020,
            services: vec![],
            authorized: true,
        }];
        portal.store().write(Collection::Clients, &existing).await.unwrap();

        let client = portal
            .save_client(new_client("New", "new@example.com", "1", "pw"))
            .await
            .unwrap();
        assert_eq!(client.id, 10);
    }

    #[tokio::test]
    async fn client_login_checks_in_order() {
        let (portal, _dir) = portal().await;
        let client = portal
            .save_client(new_client("Ada", "ada@example.com", "555-1212", "pw"))
            .await
            .unwrap();

        let login = |email: &str, phone: &str, password: &str| ClientCredentials {
            email: email.to_string(),
            phone: phone.to_string(),
            password: password.to_string(),
        };

        assert_eq!(
            portal.client_login(login("who@example.com", "555-1212", "pw")).await.unwrap_err(),
            ApiError::not_found("Client not found")
        );
        assert_eq!(
            portal.client_login(login("ada@example.com", "000", "pw")).await.unwrap_err(),
            ApiError::unauthorized("Phone mismatch")
        );
        assert_eq!(
            portal.client_login(login("ada@example.com", "555-1212", "bad")).await.unwrap_err(),
            ApiError::unauthorized("Invalid password")
        );

        let (token, id) = portal.client_login(login("ada@example.com", "555-1212", "pw")).await.unwrap();
        assert_eq!(id, client.id);
        assert!(matches!(portal.resolve(&token), Some(Principal::Client(ClientSession { id: cid, .. })) if cid == client.id));

        portal
            .save_client(SaveClient {
                id: Some(client.id),
                authorized: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        // correct password, still refused
        assert_eq!(
            portal.client_login(login("ada@example.com", "555-1212", "pw")).await.unwrap_err(),
            ApiError::forbidden("Access disabled")
        );
    }

    #[tokio::test]
    async fn bootstrap_then_admin_login() {
        let (portal, _dir) = portal().await;
        assert_eq!(
            portal
                .admin_login(Credentials {
                    email: "boss@example.com".to_string(),
                    password: "pw".to_string(),
                })
                .await
                .unwrap_err(),
            ApiError::not_found("Admin not found")
        );

        assert!(portal.bootstrap_admin("boss@example.com", "pw").await.unwrap());
        assert!(!portal.bootstrap_admin("other@example.com", "pw").await.unwrap());

        let (_, role) = portal
            .admin_login(Credentials {
                email: "boss@example.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(role, Role::Superadmin);

        let err = portal
            .admin_login(Credentials {
                email: "boss@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::unauthorized("Invalid password"));
    }

    #[tokio::test]
    async fn add_admin_needs_current_superadmin_role() {
        let (portal, _dir) = portal().await;
        portal.bootstrap_admin("boss@example.com", "pw").await.unwrap();
        let boss = AdminSession {
            email: "boss@example.com".to_string(),
            role: Role::Superadmin,
        };

        let new = |email: &str| NewAdmin {
            email: email.to_string(),
            password: "temp".to_string(),
            role: None,
        };
        portal.add_admin(Some(&boss), new("staff@example.com")).await.unwrap();
        assert_eq!(
            portal.add_admin(Some(&boss), new("staff@example.com")).await.unwrap_err(),
            ApiError::conflict("Admin already exists")
        );

        // a stale session claiming superadmin is checked against the roster
        let staff = AdminSession {
            email: "staff@example.com".to_string(),
            role: Role::Superadmin,
        };
        assert!(matches!(
            portal.add_admin(Some(&staff), new("x@example.com")).await.unwrap_err(),
            ApiError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn template_upload_assign_and_list() {
        let (portal, _dir) = portal().await;
        for i in 0..3 {
            portal
                .save_client(new_client(&format!("C{}", i), &format!("c{}@example.com", i), "1", "pw"))
                .await
                .unwrap();
        }

        let template = portal.upload_template(upload("W-9.pdf", b"%PDF")).await.unwrap();
        assert_eq!(template.id, 1);
        assert_eq!(template.name, "W-9.pdf");
        assert_eq!(template.description, "");
        assert!(template.filename.starts_with("templates/1/"));

        let doc = portal
            .assign_template(
                template.id,
                AssignTemplate {
                    client_id: Some(3),
                    year: Some(2024),
                    doc_type: Some("W-9".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(doc.filename, template.filename);
        assert_eq!(doc.template_id, Some(template.id));
        assert_eq!(doc.doc_type, "W-9");
        assert_eq!(doc.year, 2024);

        let docs = portal.client_documents(3).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, doc.id);
        assert!(portal.client_documents(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assignment_defaults_and_missing_refs() {
        let (portal, _dir) = portal().await;
        portal
            .save_client(new_client("Ada", "ada@example.com", "1", "pw"))
            .await
            .unwrap();
        let template = portal.upload_template(upload("8879.pdf", b"x")).await.unwrap();

        let doc = portal
            .assign_template(
                template.id,
                AssignTemplate {
                    client_id: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(doc.doc_type, "8879.pdf");
        assert_eq!(doc.year, current_year());

        assert!(matches!(
            portal.assign_template(99, AssignTemplate { client_id: Some(1), ..Default::default() }).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            portal.assign_template(template.id, AssignTemplate::default()).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            portal.assign_template(template.id, AssignTemplate { client_id: Some(7), ..Default::default() }).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn edit_template_bumps_updated_at() {
        let (portal, _dir) = portal().await;
        let template = portal.upload_template(upload("form.pdf", b"x")).await.unwrap();
        let edited = portal
            .edit_template(
                template.id,
                EditTemplate {
                    name: None,
                    description: Some("Engagement letter".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.name, "form.pdf");
        assert_eq!(edited.description, "Engagement letter");
        assert!(edited.updated_at >= template.updated_at);
        assert_eq!(edited.created_at, template.created_at);
    }

    #[tokio::test]
    async fn upload_document_defaults_type() {
        let (portal, _dir) = portal().await;
        portal
            .save_client(new_client("Ada", "ada@example.com", "1", "pw"))
            .await
            .unwrap();
        let doc = portal
            .upload_document(1, upload("id card.jpg", b"jpg"), None, 2024)
            .await
            .unwrap();
        assert_eq!(doc.doc_type, "Other");
        assert!(doc.filename.starts_with("clients/1/2024/"));
        assert!(doc.template_id.is_none());
        assert!(doc.signature.is_none());
        assert_eq!(portal.blobs().read(&doc.filename).await.unwrap(), b"jpg");

        assert!(matches!(
            portal.upload_document(5, upload("x.pdf", b"x"), None, 2024).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn signing_sets_both_fields_and_overwrites() {
        let (portal, _dir) = portal().await;
        portal
            .save_client(new_client("Ada", "ada@example.com", "1", "pw"))
            .await
            .unwrap();
        let doc = portal
            .upload_document(1, upload("8879.pdf", b"x"), Some("8879".to_string()), 2024)
            .await
            .unwrap();
        assert!(portal.get_document(doc.id).await.unwrap().signature.is_none());

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG first"));
        let first = portal.sign_document(doc.id, Some(data_url)).await.unwrap();
        let first_sig = first.signature.clone().unwrap();
        assert!(first_sig.signed_file.starts_with("signed/1/signed_1_"));
        assert_eq!(portal.blobs().read(&first_sig.signed_file).await.unwrap(), b"\x89PNG first");

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG second"));
        let second = portal.sign_document(doc.id, Some(data_url)).await.unwrap();
        let second_sig = second.signature.unwrap();
        assert_ne!(second_sig.signed_file, first_sig.signed_file);
        assert!(second_sig.signed_at >= first_sig.signed_at);
        assert_eq!(portal.get_document(doc.id).await.unwrap().signature, Some(second_sig));
    }

    #[tokio::test]
    async fn signing_rejects_bad_input() {
        let (portal, _dir) = portal().await;
        assert!(matches!(portal.sign_document(1, None).await, Err(ApiError::Validation(_))));
        assert!(matches!(
            portal.sign_document(1, Some("no-comma".to_string())).await,
            Err(ApiError::Validation(_))
        ));
        let ok = format!("data:image/png;base64,{}", STANDARD.encode(b"png"));
        assert!(matches!(portal.sign_document(1, Some(ok)).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn send_for_signature_mails_link() {
        let mailer = Arc::new(RecordingMailer::default());
        let (portal, _dir) = portal_with(mailer.clone()).await;
        portal
            .save_client(new_client("Ada", "ada@example.com", "1", "pw"))
            .await
            .unwrap();
        let doc = portal
            .upload_document(1, upload("8879.pdf", b"x"), None, 2024)
            .await
            .unwrap();

        portal
            .send_for_signature(doc.id, Some("ada@example.com".to_string()), "http://localhost:4000/")
            .await
            .unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        match &sent[0].body {
            crate::mail::Body::Html(html) => {
                assert!(html.contains("http://localhost:4000/client-sign.html?docId=1"))
            }
            other => panic!("unexpected body {:?}", other),
        }

        assert_eq!(
            portal
                .send_for_signature(doc.id, Some("nobody@example.com".to_string()), "http://x")
                .await
                .unwrap_err(),
            ApiError::not_found("Client not found")
        );
        assert_eq!(
            portal
                .send_for_signature(77, Some("ada@example.com".to_string()), "http://x")
                .await
                .unwrap_err(),
            ApiError::not_found("Document not found")
        );
    }

    #[tokio::test]
    async fn mail_failure_is_upstream_error() {
        let (portal, _dir) = portal_with(Arc::new(RecordingMailer::failing())).await;
        let err = portal
            .contact(ContactMessage {
                name: Some("Pat".to_string()),
                email: Some("pat@example.com".to_string()),
                message: Some("hello".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Upstream("Failed to send message".to_string()));
    }

    #[tokio::test]
    async fn service_crud_is_superadmin_only() {
        let (portal, _dir) = portal().await;
        portal.bootstrap_admin("boss@example.com", "pw").await.unwrap();
        let boss = AdminSession {
            email: "boss@example.com".to_string(),
            role: Role::Superadmin,
        };
        portal
            .add_admin(
                Some(&boss),
                NewAdmin {
                    email: "staff@example.com".to_string(),
                    password: "pw".to_string(),
                    role: None,
                },
            )
            .await
            .unwrap();
        let staff = AdminSession {
            email: "staff@example.com".to_string(),
            role: Role::Admin,
        };

        let input = || ServiceInput {
            name: Some("Bookkeeping".to_string()),
            description: Some("Monthly".to_string()),
        };
        assert!(matches!(portal.create_service(&staff, input()).await, Err(ApiError::Forbidden(_))));

        let service = portal.create_service(&boss, input()).await.unwrap();
        assert_eq!(service.id, 1);
        let updated = portal
            .update_service(
                &boss,
                service.id,
                ServiceInput {
                    name: None,
                    description: Some("Quarterly".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Bookkeeping");
        assert_eq!(updated.description, "Quarterly");

        assert!(matches!(portal.delete_service(&staff, service.id).await, Err(ApiError::Forbidden(_))));
        portal.delete_service(&boss, service.id).await.unwrap();
        assert!(portal.list_services().await.unwrap().is_empty());
        assert!(matches!(portal.delete_service(&boss, service.id).await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_email_login_is_admin_not_found() {
        let (portal, _dir) = portal().await;
        assert_eq!(
            portal.admin_login(Credentials::default()).await.unwrap_err(),
            ApiError::not_found("Admin not found")
        );
    }

    #[tokio::test]
    async fn first_admin_needs_no_session() {
        let (portal, _dir) = portal().await;
        let new = |email: &str| NewAdmin {
            email: email.to_string(),
            password: "pw".to_string(),
            role: Some(Role::Admin),
        };

        // requested role is ignored for the first admin
        portal.add_admin(None, new("first@example.com")).await.unwrap();
        let roster: AdminRoster = portal.store().read_or_default(Collection::Admins).await.unwrap();
        assert_eq!(roster.admins.len(), 1);
        assert_eq!(roster.admins[0].role, Role::Superadmin);

        assert_eq!(
            portal.add_admin(None, new("second@example.com")).await.unwrap_err(),
            ApiError::unauthorized("Admin auth required")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_setup_requests_create_one_admin() {
        let (portal, _dir) = portal().await;
        let portal = Arc::new(portal);

        let mut tasks = Vec::new();
        for i in 0..4 {
            let portal = portal.clone();
            tasks.push(tokio::spawn(async move {
                portal
                    .add_admin(
                        None,
                        NewAdmin {
                            email: format!("admin{}@example.com", i),
                            password: "pw".to_string(),
                            role: None,
                        },
                    )
                    .await
            }));
        }
        let mut created = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(()) => created += 1,
                Err(err) => assert_eq!(err, ApiError::unauthorized("Admin auth required")),
            }
        }
        assert_eq!(created, 1);
        let roster: AdminRoster = portal.store().read_or_default(Collection::Admins).await.unwrap();
        assert_eq!(roster.admins.len(), 1);
    }

    #[tokio::test]
    async fn loosely_typed_clients_file_still_serves_logins() {
        let (portal, _dir) = portal().await;
        let ada = portal
            .save_client(new_client("Ada", "ada@example.com", "555-1212", "pw"))
            .await
            .unwrap();
        let mut raw: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(portal.store().dir().join("clients.json")).unwrap()).unwrap();
        raw.push(serde_json::json!({ "id": 2, "name": "Bob", "email": "bob@example.com", "year": "2024" }));
        portal.store().write(Collection::Clients, &raw).await.unwrap();
        let docs = serde_json::json!([{
            "id": 1, "clientId": 2, "year": null, "type": "W-2",
            "filename": "clients/2/2024/1_w2.pdf", "originalName": "w2.pdf",
            "uploadedAt": "2024-03-01T12:00:00Z"
        }]);
        portal.store().write(Collection::Documents, &docs).await.unwrap();

        let (_, id) = portal
            .client_login(ClientCredentials {
                email: "ada@example.com".to_string(),
                phone: "555-1212".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(id, ada.id);
        assert_eq!(portal.get_client(2).await.unwrap().year, 2024);
        assert_eq!(portal.list_documents().await.unwrap()[0].year, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_client_saves_hash_and_keep_every_record() {
        let (portal, _dir) = portal().await;
        let portal = Arc::new(portal);

        let mut tasks = Vec::new();
        for i in 0..6 {
            let portal = portal.clone();
            tasks.push(tokio::spawn(async move {
                let mut req = new_client(&format!("C{}", i), &format!("c{}@example.com", i), "1", "pw");
                req.ssn = Some(format!("000-00-000{}", i));
                portal.save_client(req).await.unwrap()
            }));
        }
        for t in tasks {
            let client = t.await.unwrap();
            assert!(verify_password("pw", &client.password_hash));
            assert!(client.ssn_hash.starts_with("$2"));
        }

        let clients = portal.list_clients().await.unwrap();
        let mut ids: Vec<u64> = clients.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=6).collect::<Vec<_>>());
    }

    #[test]
    fn lenient_numbers_accept_strings() {
        let req: AssignTemplate = serde_json::from_value(serde_json::json!({
            "clientId": "3",
            "year": 2024,
            "type": "W-9"
        }))
        .unwrap();
        assert_eq!(req.client_id, Some(3));
        assert_eq!(req.year, Some(2024));

        let req: SaveClient = serde_json::from_value(serde_json::json!({ "id": "", "year": "" })).unwrap();
        assert_eq!(req.id, None);
        assert_eq!(req.year, None);
    }

    #[test]
    fn year_parsing() {
        assert_eq!(parse_year(Some("2023")).unwrap(), 2023);
        assert_eq!(parse_year(Some("")).unwrap(), current_year());
        assert_eq!(parse_year(None).unwrap(), current_year());
        assert!(parse_year(Some("next year")).is_err());
    }
}
