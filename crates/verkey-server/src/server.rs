use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::{require_auth, SessionKeys},
    crypto,
    handlers::{
        ban_app, change_password, check_diagnose, check_legality, check_update, check_validate,
        create_announcement, create_api_key, create_app, create_version, dashboard_stats,
        delete_api_key, delete_app, delete_version, get_app, get_version, health,
        list_announcements, list_api_keys, list_apps, list_versions, login, set_announcement,
        update_app, update_version, user_info,
    },
    store::Store,
    validate, AppState,
};

/// Bootstrap administrator credential.
pub struct AdminConfig {
    pub username: String,
    /// Plaintext; hashed once when the credential is first stored. A random
    /// password is generated and logged if unset.
    pub password: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        let password = match std::env::var("VERKEY_ADMIN_PASSWORD_FILE") {
            Ok(path) => read_secret_file(Path::new(&path))
                .map_err(|e| warn!(error = %e, "ignoring VERKEY_ADMIN_PASSWORD_FILE"))
                .ok(),
            Err(_) => None,
        };
        Self {
            username: std::env::var("VERKEY_ADMIN_USERNAME").unwrap_or_else(|_| "verkey".into()),
            password: password.or_else(|| std::env::var("VERKEY_ADMIN_PASSWORD").ok()),
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
    /// HS256 secret for session tokens ($VERKEY_JWT_SECRET). Persisted to
    /// `verkey.jwt` in the data dir when unset.
    pub jwt_secret: Option<String>,
    pub jwt_expire_hours: u64,
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("VERKEY_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("VERKEY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8913),
            data_dir: std::env::var("VERKEY_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("VERKEY_CORS_ORIGINS").ok(),
            jwt_secret: std::env::var("VERKEY_JWT_SECRET").ok(),
            jwt_expire_hours: std::env::var("VERKEY_JWT_EXPIRE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            admin: AdminConfig::default(),
        }
    }
}

/// Read a secret from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_secret_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read secret file: {}", path.display()))?;
    let secret = content.trim().to_string();
    if secret.is_empty() {
        anyhow::bail!("secret file is empty: {}", path.display());
    }
    Ok(secret)
}

/// Resolve the data directory (`verkey.db`, `verkey.jwt`), creating it if
/// needed. Without an explicit dir (`--data-dir` / `VERKEY_DATA_DIR`) the
/// platform data dir is used, e.g. `~/.local/share/verkey/`.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "verkey")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir: {}", path.display()))?;
    Ok(path)
}

/// Build the full `/api` router over `state`.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    // Public routes (no auth required).
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/check/validate", post(check_validate))
        .route("/api/check/legality", post(check_legality))
        .route("/api/check/update", post(check_update))
        .route("/api/auth/login", post(login));

    // Protected routes (admin session or API key).
    let protected = Router::new()
        .route("/api/check/diagnose", post(check_diagnose))
        .route("/api/auth/password", put(change_password))
        .route("/api/auth/user-info", get(user_info))
        .route("/api/apps", get(list_apps).post(create_app))
        .route(
            "/api/apps/{akey}",
            get(get_app).put(update_app).delete(delete_app),
        )
        .route("/api/apps/{akey}/ban", put(ban_app))
        .route(
            "/api/apps/{akey}/versions",
            get(list_versions).post(create_version),
        )
        .route(
            "/api/versions/{vkey}",
            get(get_version).put(update_version).delete(delete_version),
        )
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route(
            "/api/dashboard/announcements",
            get(list_announcements).post(create_announcement),
        )
        .route("/api/dashboard/announcements/{id}", put(set_announcement))
        .route("/api/keys", get(list_api_keys).post(create_api_key))
        .route("/api/keys/{id}", axum::routing::delete(delete_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let store = Store::open(&data_dir.join("verkey.db")).context("open store")?;
    seed_admin(&store, &cfg.admin)?;

    let secret = match cfg.jwt_secret {
        Some(s) if !s.is_empty() => s.into_bytes(),
        _ => load_or_create_jwt_secret(&data_dir)?,
    };
    let sessions = SessionKeys::new(
        &secret,
        Duration::from_secs(cfg.jwt_expire_hours.max(1) * 3600),
    );

    let state = AppState { store, sessions };
    let app = router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "verkey server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

/// Store the bootstrap admin on first start. Later starts leave the stored
/// credential alone so password changes survive restarts.
pub fn seed_admin(store: &Store, admin: &AdminConfig) -> Result<()> {
    if store.admin()?.is_some() {
        return Ok(());
    }
    validate::username(&admin.username)?;

    let password = match &admin.password {
        Some(p) => {
            validate::password(p)?;
            p.clone()
        }
        None => {
            let generated = hex::encode(crypto::generate_secret(12));
            warn!(
                username = %admin.username,
                password = %generated,
                "no admin password configured; generated one, change it after first login"
            );
            generated
        }
    };

    let hash = crypto::hash_password(&password)?;
    if store.seed_admin(&admin.username, &hash)? {
        info!(username = %admin.username, "admin credential created");
    }
    Ok(())
}

fn load_or_create_jwt_secret(data_dir: &Path) -> Result<Vec<u8>> {
    let path = data_dir.join("verkey.jwt");
    if path.exists() {
        let bytes = std::fs::read(&path).context("read verkey.jwt")?;
        if bytes.len() < 32 {
            anyhow::bail!(
                "verkey.jwt is corrupt (expected at least 32 bytes, got {})",
                bytes.len()
            );
        }
        Ok(bytes)
    } else {
        let secret = crypto::generate_secret(32);
        std::fs::write(&path, &secret).context("write verkey.jwt")?;
        info!("generated new session signing secret");
        Ok(secret)
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
