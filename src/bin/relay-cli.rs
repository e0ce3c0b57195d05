use clap::{Parser, Subcommand};
use reqwest::header::{HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for edge-relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "EDGE_RELAY_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Users, allow-list, domains, recent activity and logs
    State,
    /// Turn allow-list enforcement on
    EnableWhitelist,
    /// Turn allow-list enforcement off (every origin is permitted)
    DisableWhitelist,
    /// Add origins, separated by commas, semicolons or newlines
    Allow { origins: String },
    /// Remove one origin from the allow-list
    Disallow { origin: String },
    /// Replace the direct-download domain list
    DirectDomains { domains: String },
    /// Replace the list of public relay origins
    BaseDomains { domains: String },
    /// Create a user, or update its note
    AddUser {
        user: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Enable or disable a user
    ToggleUser { user: String },
    /// Delete a user and its activity
    DeleteUser { user: String },
}

struct AdminClient {
    client: reqwest::Client,
    base: String,
    session: HeaderValue,
}

impl AdminClient {
    async fn login(base: &str, password: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let base = base.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();
        let res = client
            .post(format!("{base}/admin/login"))
            .json(&json!({ "password": password }))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(format!("login failed with status {}", res.status()).into());
        }

        let cookie = res
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .ok_or("login response carried no session cookie")?;
        let session = HeaderValue::from_str(cookie)?;

        Ok(Self {
            client,
            base,
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/admin{}", self.base, path))
            .header(COOKIE, self.session.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let admin = AdminClient::login(&cli.url, &cli.password).await?;

    let request = match cli.command {
        Commands::State => admin.request(Method::GET, "/state"),
        Commands::EnableWhitelist => admin
            .request(Method::PUT, "/whitelist/enabled")
            .json(&json!({ "enabled": true })),
        Commands::DisableWhitelist => admin
            .request(Method::PUT, "/whitelist/enabled")
            .json(&json!({ "enabled": false })),
        Commands::Allow { origins } => admin
            .request(Method::POST, "/whitelist")
            .json(&json!({ "origins": origins })),
        Commands::Disallow { origin } => admin
            .request(Method::DELETE, "/whitelist")
            .json(&json!({ "origin": origin })),
        Commands::DirectDomains { domains } => admin
            .request(Method::PUT, "/direct-domains")
            .json(&json!({ "domains": domains })),
        Commands::BaseDomains { domains } => admin
            .request(Method::PUT, "/base-domains")
            .json(&json!({ "domains": domains })),
        Commands::AddUser { user, note } => admin
            .request(Method::POST, "/users")
            .json(&json!({ "user": user, "note": note })),
        Commands::ToggleUser { user } => {
            admin.request(Method::POST, &format!("/users/{user}/toggle"))
        }
        Commands::DeleteUser { user } => admin.request(Method::DELETE, &format!("/users/{user}")),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
