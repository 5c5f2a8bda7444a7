//! Seed script for the tax portal.
//!
//! Populates the data directory with:
//! - a superadmin (BOOTSTRAP_ADMIN_EMAIL / BOOTSTRAP_ADMIN_PASSWORD, or defaults)
//! - the service catalogue
//! - upload helper texts shown in the client portal
//! - one sample client for trying the client login
//! Run: cargo run --bin load_data
//! Existing records are left alone; the script can be rerun safely.

use serde_json::{json, Value};
use std::sync::Arc;

use tax_portal::auth::{AdminSession, SessionRegistry};
use tax_portal::blobs::BlobStore;
use tax_portal::config::Config;
use tax_portal::mail::LogMailer;
use tax_portal::models::Role;
use tax_portal::portal::{Portal, SaveClient, ServiceInput};
use tax_portal::storage::{Collection, RecordStore};

const SERVICES: &[(&str, &str)] = &[
    ("Individual Tax Preparation", "Federal and state returns for individuals and families"),
    ("Business Tax Preparation", "Returns for sole proprietors, partnerships and corporations"),
    ("Bookkeeping", "Monthly reconciliation and financial statements"),
    ("Tax Resolution", "IRS notices, payment plans and audit support"),
];

fn helper_texts() -> Vec<Value> {
    vec![
        json!({ "target": "upload-id", "text": "Upload a clear photo of the front of your driver license or state ID." }),
        json!({ "target": "upload-w2", "text": "Upload every W-2 you received for the tax year." }),
        json!({ "target": "upload-1099", "text": "Include all 1099 forms: interest, dividends, contract work and retirement." }),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let config = Config::with_dirs(
        std::env::var("PORTAL_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        std::env::var("PORTAL_UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
    );
    let store = RecordStore::open(&config.data_dir).await?;
    let blobs = BlobStore::open(&config.upload_dir).await?;
    let portal = Portal::new(
        store,
        blobs,
        SessionRegistry::new(None),
        Arc::new(LogMailer),
        config.mail_from.clone(),
        config.contact_email.clone(),
    );

    let email = std::env::var("BOOTSTRAP_ADMIN_EMAIL").unwrap_or_else(|_| "admin@solidifiedtaxgroup.com".to_string());
    let password = std::env::var("BOOTSTRAP_ADMIN_PASSWORD").unwrap_or_else(|_| "changeme".to_string());
    let created = portal
        .bootstrap_admin(&email, &password)
        .await
        .map_err(|e| format!("seed admin: {:?}", e))?;
    if created {
        println!("✅ Created superadmin {}", email);
    } else {
        println!("Admin roster already populated, skipping superadmin");
    }

    if portal.list_services().await.map_err(|e| format!("{:?}", e))?.is_empty() {
        let actor = AdminSession {
            email: email.clone(),
            role: Role::Superadmin,
        };
        for (name, description) in SERVICES {
            portal
                .create_service(
                    &actor,
                    ServiceInput {
                        name: Some(name.to_string()),
                        description: Some(description.to_string()),
                    },
                )
                .await
                .map_err(|e| format!("seed service {}: {:?}", name, e))?;
        }
        println!("✅ Loaded {} services", SERVICES.len());
    }

    if portal.store().read::<Vec<Value>>(Collection::Helpers).await?.is_none() {
        portal.store().write(Collection::Helpers, &helper_texts()).await?;
        println!("✅ Wrote upload helper texts");
    }

    if portal.list_clients().await.map_err(|e| format!("{:?}", e))?.is_empty() {
        let client = portal
            .save_client(SaveClient {
                name: Some("Sample Client".to_string()),
                email: Some("client@example.com".to_string()),
                phone: Some("555-0100".to_string()),
                password: Some("client".to_string()),
                services: Some(vec![SERVICES[0].0.to_string()]),
                ..Default::default()
            })
            .await
            .map_err(|e| format!("seed client: {:?}", e))?;
        println!("✅ Created sample client #{} (client@example.com / 555-0100 / client)", client.id);
    }

    Ok(())
}
