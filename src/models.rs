use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Admin privilege level. `Superadmin` may add admins and edit services.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    pub role: Role,
}

/// On-disk shape of `admin.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AdminRoster {
    #[serde(default)]
    pub admins: Vec<Admin>,
}

impl AdminRoster {
    pub fn find(&self, email: &str) -> Option<&Admin> {
        self.admins.iter().find(|a| a.email == email)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub ssn_hash: String,
    #[serde(default)]
    pub driver_license_hash: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "stored_year")]
    pub year: i32,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub authorized: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Blob path relative to the upload root.
    pub filename: String,
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: u64,
    pub client_id: u64,
    #[serde(default)]
    pub template_id: Option<u64>,
    #[serde(default, deserialize_with = "stored_year")]
    pub year: i32,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    pub filename: String,
    #[serde(default)]
    pub original_name: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub signature: Option<Signature>,
}

/// Tax year as found on disk. Older records hold it as a string, and a
/// year that failed to parse was stored as `null`; both read as a number,
/// with 0 for unknown.
fn stored_year<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let year = match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(year.unwrap_or(0))
}

/// Captured signature. Present as a whole or not at all, so `signedFile`
/// never appears without `signedAt`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub signed_file: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Service {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Records carrying a numeric id allocated as max + 1.
pub trait Identified {
    fn id(&self) -> u64;
}

impl Identified for Client {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Identified for Template {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Identified for Document {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Identified for Service {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Next id for a collection: one past the current maximum, 1 when empty.
pub fn next_id<T: Identified>(records: &[T]) -> u64 {
    records.iter().map(Identified::id).max().map_or(1, |max| max + 1)
}
