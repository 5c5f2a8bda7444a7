use clap::{Parser, Subcommand};
use reqwest::{multipart, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;

const TOKEN_FILE: &str = ".portal_token";

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "Admin CLI for the tax portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "PORTAL_URL", default_value = "http://localhost:4000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    AddAdmin {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        superadmin: bool,
    },
    ListClients,
    /// Create a client, or patch one when --id is given.
    SaveClient {
        #[arg(short, long)]
        id: Option<u64>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        year: Option<i32>,
        #[arg(long)]
        authorized: Option<bool>,
    },
    UploadTemplate {
        #[arg(short, long)]
        file: PathBuf,
    },
    ListTemplates,
    Assign {
        #[arg(short, long)]
        template_id: u64,
        #[arg(short, long)]
        client_id: u64,
        #[arg(short, long)]
        year: Option<i32>,
        #[arg(long = "type")]
        doc_type: Option<String>,
    },
    SendForSignature {
        #[arg(short, long)]
        document_id: u64,
        #[arg(short = 'e', long)]
        client_email: String,
    },
    AddService {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    DeleteService {
        #[arg(short, long)]
        id: u64,
    },
    Logout,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    role: String,
}

fn authed(req: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    req.bearer_auth(token.trim())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    println!("{} {}", status.as_u16(), res.text().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{}/api/admin/login", url))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in as {}. Token saved to {}", body.role, TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::AddAdmin { email, password, superadmin } => {
            let role = if superadmin { "superadmin" } else { "admin" };
            let res = authed(client.post(format!("{}/api/admin/add-admin", url)))
                .json(&json!({ "email": email, "password": password, "role": role }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ListClients => {
            let res = authed(client.get(format!("{}/api/clients", url))).send().await?;
            print_response(res).await?;
        }
        Commands::SaveClient { id, name, email, phone, password, status, year, authorized } => {
            // only send what was given so updates stay partial
            let mut body = Map::new();
            let fields = [
                ("id", id.map(Value::from)),
                ("name", name.map(Value::from)),
                ("email", email.map(Value::from)),
                ("phone", phone.map(Value::from)),
                ("password", password.map(Value::from)),
                ("status", status.map(Value::from)),
                ("year", year.map(Value::from)),
                ("authorized", authorized.map(Value::from)),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    body.insert(key.to_string(), value);
                }
            }
            let res = authed(client.post(format!("{}/api/admin/clients/save", url)))
                .json(&Value::Object(body))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::UploadTemplate { file } => {
            let bytes = fs::read(&file)?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "template".to_string());
            let form = multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(file_name));
            let res = authed(client.post(format!("{}/api/templates/upload", url)))
                .multipart(form)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ListTemplates => {
            let res = authed(client.get(format!("{}/api/templates", url))).send().await?;
            print_response(res).await?;
        }
        Commands::Assign { template_id, client_id, year, doc_type } => {
            let res = authed(client.post(format!(
                "{}/api/admin/templates/{}/assign-to-client",
                url, template_id
            )))
            .json(&json!({ "clientId": client_id, "year": year, "type": doc_type }))
            .send()
            .await?;
            print_response(res).await?;
        }
        Commands::SendForSignature { document_id, client_email } => {
            let res = authed(client.post(format!(
                "{}/api/admin/documents/{}/send-for-signature",
                url, document_id
            )))
            .json(&json!({ "clientEmail": client_email }))
            .send()
            .await?;
            print_response(res).await?;
        }
        Commands::AddService { name, description } => {
            let res = authed(client.post(format!("{}/api/services/add", url)))
                .json(&json!({ "name": name, "description": description }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::DeleteService { id } => {
            let res = authed(client.delete(format!("{}/api/services/{}", url, id))).send().await?;
            print_response(res).await?;
        }
        Commands::Logout => {
            let res = authed(client.post(format!("{}/api/logout", url))).send().await?;
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out ({}). Token removed.", res.status().as_u16());
        }
    }

    Ok(())
}
