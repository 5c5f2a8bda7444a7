use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::models::Role;

/// bcrypt cost for passwords and other one-way hashed identifiers.
pub const HASH_COST: u32 = 10;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, HASH_COST)
}

/// Check a password against a stored hash. An empty or malformed hash never
/// matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if hash.is_empty() {
        return false;
    }
    verify(password, hash).unwrap_or(false)
}

/// Authenticated identity behind a session token.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Admin(AdminSession),
    Client(ClientSession),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminSession {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub id: u64,
    pub email: String,
}

#[derive(Debug, Clone)]
struct Session {
    principal: Principal,
    created_at: DateTime<Utc>,
}

/// In-memory bearer-token sessions. Tokens are 256 random bits, hex encoded.
/// Without a TTL a session lives until it is revoked or the process exits.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    ttl: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn create(&self, principal: Principal) -> String {
        let bytes: [u8; 32] = rand::random();
        let token = hex::encode(bytes);
        self.sessions.insert(
            token.clone(),
            Session {
                principal,
                created_at: Utc::now(),
            },
        );
        token
    }

    pub fn resolve(&self, token: &str) -> Option<Principal> {
        {
            let session = self.sessions.get(token)?;
            let live = self.ttl.map_or(true, |ttl| Utc::now() - session.created_at <= ttl);
            if live {
                return Some(session.principal.clone());
            }
        }
        debug!("session expired");
        self.sessions.remove(token);
        None
    }

    /// Drop a session. Returns whether the token was live.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
