//! Tax portal server.
//!
//! Usage:
//!   cargo run --bin load_data     # seed admin, services, helper texts
//!   cargo run --bin tax_portal    # start server (PORT, default 4000)

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tax_portal::auth::SessionRegistry;
use tax_portal::blobs::BlobStore;
use tax_portal::config::Config;
use tax_portal::mail::{LogMailer, Mailer, SmtpMailer};
use tax_portal::portal::Portal;
use tax_portal::rest::create_router;
use tax_portal::storage::RecordStore;

/// Console logging plus an optional daily-rotated JSON file. The returned
/// guard flushes the file writer and must live as long as the process.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tax_portal.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    guard
}

fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>, Box<dyn std::error::Error>> {
    match &config.smtp_host {
        Some(host) => {
            let mailer = SmtpMailer::new(host, config.smtp_port, &config.smtp_user, &config.smtp_pass)?;
            info!(%host, port = config.smtp_port, "SMTP relay configured");
            Ok(Arc::new(mailer))
        }
        None => {
            warn!("SMTP_HOST not set, outbound mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let _log_guard = init_tracing(&config);

    let store = RecordStore::open(&config.data_dir).await?;
    let blobs = BlobStore::open(&config.upload_dir).await?;
    let sessions = SessionRegistry::new(config.session_ttl());
    let mailer = build_mailer(&config)?;
    let portal = Portal::new(
        store,
        blobs,
        sessions,
        mailer,
        config.mail_from.clone(),
        config.contact_email.clone(),
    );

    if let (Some(email), Some(password)) = (&config.bootstrap_admin_email, &config.bootstrap_admin_password) {
        portal
            .bootstrap_admin(email, password)
            .await
            .map_err(|e| format!("bootstrap admin: {:?}", e))?;
    }

    info!(
        data_dir = %config.data_dir.display(),
        upload_dir = %config.upload_dir.display(),
        client_auth = config.require_client_auth,
        "portal storage ready"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = create_router(Arc::new(portal), Arc::new(config));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tax portal listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
