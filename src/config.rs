//! Server configuration from CLI flags and environment (`.env` supported).

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "tax_portal")]
#[command(about = "Client document portal and admin dashboard", long_about = None)]
pub struct Config {
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Directory holding the JSON collections.
    #[arg(long, env = "PORTAL_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Root of the uploaded-file tree served under /uploads.
    #[arg(long, env = "PORTAL_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Request body limit in bytes (JSON and multipart).
    #[arg(long, env = "PORTAL_BODY_LIMIT", default_value_t = 25 * 1024 * 1024)]
    pub body_limit: usize,

    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    #[arg(long, env = "SMTP_USER", default_value = "")]
    pub smtp_user: String,

    #[arg(long, env = "SMTP_PASS", default_value = "", hide_env_values = true)]
    pub smtp_pass: String,

    #[arg(long, env = "MAIL_FROM", default_value = "no-reply@solidifiedtaxgroup.com")]
    pub mail_from: String,

    /// Destination for contact-form messages.
    #[arg(long, env = "CONTACT_EMAIL", default_value = "info@solidifiedtaxgroup.com")]
    pub contact_email: String,

    /// Base for signing links; defaults to `http://<Host header>`.
    #[arg(long, env = "PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Superadmin created at startup when no admin exists.
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,

    /// Require a matching session for client records, documents and uploads.
    #[arg(long, env = "PORTAL_REQUIRE_CLIENT_AUTH", default_value_t = false)]
    pub require_client_auth: bool,

    /// Session lifetime; sessions never expire when unset.
    #[arg(long, env = "PORTAL_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<i64>,

    #[arg(long, env = "PORTAL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Also write daily-rotated log files here.
    #[arg(long, env = "PORTAL_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load `.env` (if present) and parse flags and environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }

    /// Defaults rooted at the given directories.
    pub fn with_dirs(data_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            port: 4000,
            data_dir: data_dir.into(),
            upload_dir: upload_dir.into(),
            body_limit: 25 * 1024 * 1024,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            mail_from: "no-reply@solidifiedtaxgroup.com".to_string(),
            contact_email: "info@solidifiedtaxgroup.com".to_string(),
            public_base_url: None,
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            require_client_auth: false,
            session_ttl_secs: None,
            log_json: false,
            log_dir: None,
        }
    }

    pub fn session_ttl(&self) -> Option<chrono::Duration> {
        self.session_ttl_secs.map(chrono::Duration::seconds)
    }
}
