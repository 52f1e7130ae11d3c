use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "verkey", about = "VerKey: application and version key service", version)]
struct Cli {
    /// VerKey server URL (default: http://localhost:8913 or $VERKEY_SERVER)
    #[arg(long, env = "VERKEY_SERVER", default_value = "http://localhost:8913")]
    server: String,

    /// Bearer token: admin session token or `vk_key_` API key ($VERKEY_TOKEN)
    #[arg(long, env = "VERKEY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the VerKey HTTP server
    Serve {
        /// Port to listen on (default: $VERKEY_PORT or 8913)
        #[arg(long, env = "VERKEY_PORT", default_value = "8913")]
        port: u16,
        /// Host to bind (default: $VERKEY_HOST or 0.0.0.0)
        #[arg(long, env = "VERKEY_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Log in as the administrator and print a session token
    Login {
        #[arg(long, env = "VERKEY_ADMIN_USERNAME", default_value = "verkey")]
        username: String,
        #[arg(long, env = "VERKEY_ADMIN_PASSWORD")]
        password: String,
    },
    /// List apps visible to the caller
    Apps {
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "10")]
        size: u32,
    },
    /// Register a new app and print its AKey
    CreateApp {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        paid: bool,
    },
    /// List versions of an app, newest first
    Versions { akey: String },
    /// Publish a version under an app and print its VKey
    Release {
        akey: String,
        /// Semantic version, e.g. 1.2.0
        version: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Mark as the app's latest version
        #[arg(long)]
        latest: bool,
        /// Clients older than this must update
        #[arg(long)]
        forced: bool,
    },
    /// Check whether an AKey/VKey pair is legal
    Check { akey: String, vkey: String },
    /// Check whether a newer version than VKey is available
    Update { akey: String, vkey: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VERKEY_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Login { username, password } => {
            cmd_login(&cli.server, &username, &password).await
        }

        Commands::Apps { page, size } => {
            let token = require_token(&cli.token)?;
            cmd_apps(&cli.server, &token, page, size).await
        }

        Commands::CreateApp {
            name,
            description,
            paid,
        } => {
            let token = require_token(&cli.token)?;
            let body = json!({"name": name, "description": description, "is_paid": paid});
            let app: Value = post_json(&cli.server, Some(&token), "/api/apps", &body).await?;
            println!("{}", app["akey"].as_str().unwrap_or_default());
            Ok(())
        }

        Commands::Versions { akey } => {
            let token = require_token(&cli.token)?;
            cmd_versions(&cli.server, &token, &akey).await
        }

        Commands::Release {
            akey,
            version,
            description,
            latest,
            forced,
        } => {
            let token = require_token(&cli.token)?;
            let body = json!({
                "version": version,
                "description": description,
                "is_latest": latest,
                "is_forced_update": forced,
            });
            let path = format!("/api/apps/{akey}/versions");
            let created: Value = post_json(&cli.server, Some(&token), &path, &body).await?;
            println!("{}", created["vkey"].as_str().unwrap_or_default());
            Ok(())
        }

        Commands::Check { akey, vkey } => cmd_check(&cli.server, &akey, &vkey).await,

        Commands::Update { akey, vkey } => cmd_update(&cli.server, &akey, &vkey).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = verkey_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    verkey_server::run(cfg).await
}

async fn cmd_login(server: &str, username: &str, password: &str) -> Result<()> {
    let body = json!({"username": username, "password": password});
    let session: Value = post_json(server, None, "/api/auth/login", &body).await?;
    println!("{}", session["token"].as_str().unwrap_or_default());
    if let Some(exp) = session["expires_at"].as_str() {
        eprintln!("expires at {exp}");
    }
    Ok(())
}

#[derive(Deserialize)]
struct AppItem {
    akey: String,
    name: String,
    version_count: u64,
    is_banned: bool,
}

#[derive(Deserialize)]
struct VersionItem {
    vkey: String,
    version: String,
    is_latest: bool,
    is_forced_update: bool,
    created_at: String,
}

#[derive(Deserialize)]
struct Listing<T> {
    total: u64,
    list: Vec<T>,
}

async fn cmd_apps(server: &str, token: &str, page: u32, size: u32) -> Result<()> {
    let resp = Client::new()
        .get(url(server, "/api/apps"))
        .query(&[("page", page), ("size", size)])
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;
    let apps: Listing<AppItem> = read_json(resp).await?;

    if apps.list.is_empty() {
        println!("(no apps)");
        return Ok(());
    }
    for a in &apps.list {
        let banned = if a.is_banned { " [banned]" } else { "" };
        println!("  {}  {} ({} versions){banned}", a.akey, a.name, a.version_count);
    }
    println!("{} of {} app(s)", apps.list.len(), apps.total);
    Ok(())
}

async fn cmd_versions(server: &str, token: &str, akey: &str) -> Result<()> {
    let resp = Client::new()
        .get(url(server, &format!("/api/apps/{akey}/versions")))
        .query(&[("size", 100)])
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;
    let versions: Listing<VersionItem> = read_json(resp).await?;

    if versions.list.is_empty() {
        println!("(no versions)");
        return Ok(());
    }
    for v in &versions.list {
        let mut flags = Vec::new();
        if v.is_latest {
            flags.push("latest");
        }
        if v.is_forced_update {
            flags.push("forced");
        }
        println!("  {}  {}  {}  {}", v.vkey, v.version, v.created_at, flags.join(","));
    }
    Ok(())
}

async fn cmd_check(server: &str, akey: &str, vkey: &str) -> Result<()> {
    let resp = Client::new()
        .post(url(server, "/api/check/legality"))
        .json(&json!({"akey": akey, "vkey": vkey}))
        .send()
        .await
        .context("HTTP request failed")?;

    // Illegal pairs answer 404 with a normal body.
    let json: Value = resp.json().await.context("parse response")?;
    if json["legal"].as_bool().unwrap_or(false) {
        println!("✓ legal");
        Ok(())
    } else {
        let msg = json["message"]
            .as_str()
            .or_else(|| json["error"].as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("illegal: {msg}");
    }
}

async fn cmd_update(server: &str, akey: &str, vkey: &str) -> Result<()> {
    let body = json!({"akey": akey, "vkey": vkey});
    let json: Value = post_json(server, None, "/api/check/update", &body).await?;

    if json["has_update"].as_bool().unwrap_or(false) {
        let forced = if json["is_forced_update"].as_bool().unwrap_or(false) {
            " (forced)"
        } else {
            ""
        };
        println!(
            "update available: {} released {}{forced}",
            json["latest_version"].as_str().unwrap_or("?"),
            json["release_time"].as_str().unwrap_or("?"),
        );
    } else {
        println!("{}", json["message"].as_str().unwrap_or("no update"));
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token or VERKEY_TOKEN is required for this command")
}

fn url(server: &str, path: &str) -> String {
    format!("{}{path}", server.trim_end_matches('/'))
}

async fn post_json<T: serde::de::DeserializeOwned>(
    server: &str,
    token: Option<&str>,
    path: &str,
    body: &Value,
) -> Result<T> {
    let mut req = Client::new().post(url(server, path)).json(body);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.context("HTTP request failed")?;
    read_json(resp).await
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let json: Value = resp.json().await.unwrap_or_default();
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("server returned {status}: {error}");
    }
    resp.json().await.context("parse response")
}
