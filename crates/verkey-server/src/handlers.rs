use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::Identity,
    crypto,
    error::{Error, Result},
    store::{
        api_keys::{self, ApiKeyRecord},
        App, AppUpdate, Legality, NewAnnouncement, NewVersion, Page, UpdateCheck, Version,
        VersionUpdate,
    },
    validate, AppState,
};

/// Public message for any failed legality check; the cause stays internal.
const CHECK_FAILED: &str = "verification failed";

// ── Ownership helpers ────────────────────────────────────────────────────────

fn owned_app(state: &AppState, identity: &Identity, akey: &str) -> Result<App> {
    let app = state.store.get_app(akey)?;
    if !identity.can_manage(&app.owner) {
        // Same answer as a missing app so keys of other owners are not probed.
        return Err(Error::not_found("app not found"));
    }
    Ok(app)
}

fn owned_version(state: &AppState, identity: &Identity, vkey: &str) -> Result<Version> {
    let version = state.store.get_version(vkey)?;
    if !identity.admin {
        let app = state.store.get_app(&version.akey)?;
        if !identity.can_manage(&app.owner) {
            return Err(Error::not_found("version not found"));
        }
    }
    Ok(version)
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "verkey",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Client checks ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub akey: String,
    pub vkey: String,
}

impl CheckRequest {
    fn validate(&self) -> Result<()> {
        if self.akey.trim().is_empty() || self.vkey.trim().is_empty() {
            return Err(Error::validation("akey and vkey are required"));
        }
        Ok(())
    }
}

pub async fn check_validate(
    State(state): State<AppState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response> {
    body.validate()?;
    let resp = match state.store.check_legality(&body.akey, &body.vkey)? {
        Legality::Legal { app_name, version } => json!({
            "valid": true,
            "message": "verification succeeded",
            "app_name": app_name,
            "version": version,
        }),
        Legality::Illegal(_) => json!({
            "valid": false,
            "message": CHECK_FAILED,
        }),
    };
    Ok(Json(resp).into_response())
}

pub async fn check_legality(
    State(state): State<AppState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response> {
    body.validate()?;
    let legality = state.store.check_legality(&body.akey, &body.vkey)?;
    let resp = if legality.is_legal() {
        (
            StatusCode::OK,
            Json(json!({"legal": true, "message": "legal"})),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"legal": false, "message": CHECK_FAILED})),
        )
    };
    Ok(resp.into_response())
}

pub async fn check_update(
    State(state): State<AppState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response> {
    body.validate()?;
    let resp = match state.store.check_update(&body.akey, &body.vkey)? {
        UpdateCheck::Illegal => json!({"has_update": false, "message": CHECK_FAILED}),
        UpdateCheck::UpToDate => {
            json!({"has_update": false, "message": "already on the latest version"})
        }
        UpdateCheck::NoRelease => {
            json!({"has_update": false, "message": "no release available"})
        }
        UpdateCheck::Available {
            latest_version,
            release_time,
            is_forced_update,
        } => json!({
            "has_update": true,
            "message": "a newer version is available",
            "latest_version": latest_version,
            "release_time": release_time,
            "is_forced_update": is_forced_update,
        }),
    };
    Ok(Json(resp).into_response())
}

/// Authenticated variant of the legality check that exposes the failure reason.
pub async fn check_diagnose(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Json(body): Json<CheckRequest>,
) -> Result<Response> {
    body.validate()?;
    let resp = match state.store.check_legality(&body.akey, &body.vkey)? {
        Legality::Legal { app_name, version } => json!({
            "legal": true,
            "app_name": app_name,
            "version": version,
        }),
        Legality::Illegal(reason) => json!({
            "legal": false,
            "reason": reason,
            "message": reason.message(),
        }),
    };
    Ok(Json(resp).into_response())
}

// ── Auth ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response> {
    let admin = state
        .store
        .admin()?
        .ok_or_else(|| anyhow::anyhow!("admin credential not initialised"))?;

    let user_ok = constant_time_eq::constant_time_eq(
        body.username.as_bytes(),
        admin.username.as_bytes(),
    );
    if !(user_ok && crypto::verify_password(&body.password, &admin.password_hash)) {
        warn!(username = %body.username, "audit: auth.login.failed");
        return Err(Error::Unauthorized);
    }

    let (token, expires_at) = state.sessions.issue(&admin.username)?;
    info!(username = %admin.username, "audit: auth.login");
    Ok(Json(json!({"token": token, "expires_at": expires_at})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Response> {
    identity.require_admin()?;
    validate::password(&body.new_password)?;

    let admin = state
        .store
        .admin()?
        .ok_or_else(|| anyhow::anyhow!("admin credential not initialised"))?;
    if !crypto::verify_password(&body.old_password, &admin.password_hash) {
        return Err(Error::validation("old password is incorrect"));
    }

    let hash = crypto::hash_password(&body.new_password)?;
    state.store.set_admin_password(&hash)?;
    info!(username = %admin.username, "audit: auth.password_change");
    Ok(Json(json!({"updated": true})).into_response())
}

pub async fn user_info(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    Json(identity)
}

// ── Apps ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageParams {
    fn page(&self) -> Page {
        Page::new(self.page, self.size)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_paid: bool,
}

pub async fn create_app(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateAppRequest>,
) -> Result<Response> {
    validate::app_name(&body.name)?;
    validate::description(&body.description)?;

    let app = state
        .store
        .create_app(&identity.subject, &body.name, &body.description, body.is_paid)?;
    info!(akey = %app.akey, owner = %app.owner, "audit: app.create");
    Ok((StatusCode::CREATED, Json(app)).into_response())
}

pub async fn list_apps(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<PageParams>,
) -> Result<Response> {
    let (apps, total) = state
        .store
        .list_apps(identity.owner_filter(), params.page())?;
    Ok(Json(json!({"total": total, "list": apps})).into_response())
}

pub async fn get_app(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
) -> Result<Response> {
    let app = owned_app(&state, &identity, &akey)?;
    Ok(Json(app).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_paid: Option<bool>,
}

pub async fn update_app(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
    Json(body): Json<UpdateAppRequest>,
) -> Result<Response> {
    owned_app(&state, &identity, &akey)?;
    if let Some(name) = body.name.as_deref().filter(|n| !n.trim().is_empty()) {
        validate::app_name(name)?;
    }
    if let Some(desc) = body.description.as_deref() {
        validate::description(desc)?;
    }

    let app = state.store.update_app(
        &akey,
        AppUpdate {
            name: body.name,
            description: body.description,
            is_paid: body.is_paid,
        },
    )?;
    info!(akey = %akey, "audit: app.update");
    Ok(Json(app).into_response())
}

#[derive(Debug, Deserialize)]
pub struct BanAppRequest {
    pub banned: bool,
    pub reason: Option<String>,
}

pub async fn ban_app(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
    Json(body): Json<BanAppRequest>,
) -> Result<Response> {
    identity.require_admin()?;
    if let Some(reason) = body.reason.as_deref() {
        validate::description(reason)?;
    }
    let app = state.store.ban_app(&akey, body.banned, body.reason)?;
    info!(akey = %akey, banned = app.is_banned, "audit: app.ban");
    Ok(Json(app).into_response())
}

pub async fn delete_app(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
) -> Result<Response> {
    owned_app(&state, &identity, &akey)?;
    state.store.delete_app(&akey)?;
    info!(akey = %akey, "audit: app.delete");
    Ok(Json(json!({"deleted": true})).into_response())
}

// ── Versions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateVersionRequest {
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub is_forced_update: bool,
}

pub async fn create_version(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
    Json(body): Json<CreateVersionRequest>,
) -> Result<Response> {
    owned_app(&state, &identity, &akey)?;
    validate::version(&body.version)?;
    validate::description(&body.description)?;

    let version = state.store.create_version(
        &akey,
        NewVersion {
            version: body.version,
            description: body.description,
            is_latest: body.is_latest,
            is_forced_update: body.is_forced_update,
        },
    )?;
    info!(
        akey = %akey,
        vkey = %version.vkey,
        is_latest = version.is_latest,
        "audit: version.create"
    );
    Ok((StatusCode::CREATED, Json(version)).into_response())
}

pub async fn list_versions(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(akey): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Response> {
    owned_app(&state, &identity, &akey)?;
    let (versions, total) = state.store.list_versions(&akey, params.page())?;
    Ok(Json(json!({"total": total, "list": versions})).into_response())
}

pub async fn get_version(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(vkey): Path<String>,
) -> Result<Response> {
    let version = owned_version(&state, &identity, &vkey)?;
    Ok(Json(version).into_response())
}

/// Body of `PUT /api/versions/{vkey}`. This is a full replace of the flags:
/// omitting `is_latest` reads as `false`, so sending it without the flag for
/// the current latest version hands latest to the newest other version, and
/// omitting `is_forced_update` clears it. Empty strings keep the stored text.
#[derive(Debug, Deserialize)]
pub struct UpdateVersionRequest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub is_forced_update: bool,
}

pub async fn update_version(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(vkey): Path<String>,
    Json(body): Json<UpdateVersionRequest>,
) -> Result<Response> {
    owned_version(&state, &identity, &vkey)?;
    if !body.version.trim().is_empty() {
        validate::version(&body.version)?;
    }
    validate::description(&body.description)?;

    let version = state.store.update_version(
        &vkey,
        VersionUpdate {
            version: body.version,
            description: body.description,
            is_latest: body.is_latest,
            is_forced_update: body.is_forced_update,
        },
    )?;
    info!(vkey = %vkey, is_latest = version.is_latest, "audit: version.update");
    Ok(Json(version).into_response())
}

pub async fn delete_version(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(vkey): Path<String>,
) -> Result<Response> {
    owned_version(&state, &identity, &vkey)?;
    let removed = state.store.delete_version(&vkey)?;
    info!(vkey = %vkey, akey = %removed.akey, "audit: version.delete");
    Ok(Json(json!({"deleted": true})).into_response())
}

// ── Dashboard ─────────────────────────────────────────────────────────────────

pub async fn dashboard_stats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let stats = state.store.stats(identity.owner_filter())?;
    Ok(Json(stats).into_response())
}

pub async fn list_announcements(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
) -> Result<Response> {
    let announcements = state.store.active_announcements()?;
    Ok(Json(json!({"list": announcements})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
}

pub async fn create_announcement(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateAnnouncementRequest>,
) -> Result<Response> {
    identity.require_admin()?;
    let title_len = body.title.trim().chars().count();
    if title_len == 0 || title_len > 100 {
        return Err(Error::validation("title must be 1 to 100 characters"));
    }
    if body.content.trim().is_empty() || body.content.chars().count() > 2000 {
        return Err(Error::validation("content must be 1 to 2000 characters"));
    }

    let announcement = state.store.create_announcement(NewAnnouncement {
        title: body.title,
        content: body.content,
        url: body.url,
        publish_date: body.publish_date,
    })?;
    info!(id = %announcement.id, "audit: announcement.create");
    Ok((StatusCode::CREATED, Json(announcement)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SetAnnouncementRequest {
    pub is_active: bool,
}

pub async fn set_announcement(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(body): Json<SetAnnouncementRequest>,
) -> Result<Response> {
    identity.require_admin()?;
    let announcement = state.store.set_announcement_active(&id, body.is_active)?;
    info!(id = %id, is_active = body.is_active, "audit: announcement.update");
    Ok(Json(announcement).into_response())
}

// ── API Keys ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub label: String,
}

pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateApiKeyRequest>,
) -> Result<Response> {
    identity.require_admin()?;
    let label = body.label.trim();
    if label.is_empty() || label.chars().count() > 100 {
        return Err(Error::validation("label must be 1 to 100 characters"));
    }

    let raw_key = api_keys::generate_api_key();
    let record = ApiKeyRecord {
        id: api_keys::generate_key_id(),
        key_hash: api_keys::hash_key(&raw_key),
        label: label.to_owned(),
        created_at: Utc::now().timestamp(),
    };
    state.store.put_api_key(&record)?;
    info!(id = %record.id, "audit: key.create");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": record.id,
            "key": raw_key,
            "label": record.label,
            "subject": record.subject(),
        })),
    )
        .into_response())
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    identity.require_admin()?;
    let keys: Vec<_> = state
        .store
        .list_api_keys()?
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "label": r.label,
                "subject": r.subject(),
                "created_at": r.created_at,
            })
        })
        .collect();
    Ok(Json(json!({"keys": keys})).into_response())
}

pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Response> {
    identity.require_admin()?;
    if !state.store.delete_api_key(&id)? {
        return Err(Error::not_found("api key not found"));
    }
    info!(id = %id, "audit: key.delete");
    Ok(Json(json!({"deleted": true})).into_response())
}
