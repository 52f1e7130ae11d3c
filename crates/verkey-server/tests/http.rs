use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use verkey_server::{
    auth::SessionKeys,
    server::{router, seed_admin, AdminConfig},
    store::Store,
    AppState,
};

const ADMIN_USER: &str = "verkey_admin";
const ADMIN_PASS: &str = "s3cret-pass";

fn test_app(tmp: &tempfile::TempDir) -> Router {
    let store = Store::open(&tmp.path().join("verkey.db")).expect("store");
    seed_admin(
        &store,
        &AdminConfig {
            username: ADMIN_USER.into(),
            password: Some(ADMIN_PASS.into()),
        },
    )
    .expect("seed admin");

    let sessions = SessionKeys::new(&[7u8; 32], Duration::from_secs(3600));
    router(AppState { store, sessions }, None)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string())),
        None => req.body(Body::empty()),
    }
    .expect("request");

    let res = app.clone().oneshot(req).await.expect("response");
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, json)
}

async fn login(app: &Router) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": ADMIN_USER, "password": ADMIN_PASS})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["expires_at"].is_string());
    body["token"].as_str().expect("token").to_owned()
}

async fn create_app(app: &Router, token: &str, name: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/apps",
        Some(token),
        Some(json!({"name": name, "description": "test app"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["akey"].as_str().expect("akey").to_owned()
}

async fn create_version(app: &Router, token: &str, akey: &str, version: &str, latest: bool) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        &format!("/api/apps/{akey}/versions"),
        Some(token),
        Some(json!({"version": version, "is_latest": latest})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["vkey"].as_str().expect("vkey").to_owned()
}

async fn create_api_key(app: &Router, admin: &str, label: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/keys",
        Some(admin),
        Some(json!({"label": label})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["key"].as_str().expect("key").to_owned()
}

#[tokio::test]
async fn health_is_public() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": ADMIN_USER, "password": "wrong-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": "nobody", "password": ADMIN_PASS})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_require_token() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);

    let (status, body) = send(&app, Method::GET, "/api/apps", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, Method::GET, "/api/apps", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/api/apps", Some("vk_key_unknown"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_info_reports_admin() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let (status, body) = send(&app, Method::GET, "/api/auth/user-info", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"subject": ADMIN_USER, "admin": true}));
}

#[tokio::test]
async fn password_change_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/auth/password",
        Some(&token),
        Some(json!({"old_password": "not-it", "new_password": "brand-new-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/auth/password",
        Some(&token),
        Some(json!({"old_password": ADMIN_PASS, "new_password": "brand-new-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({"username": ADMIN_USER, "password": "brand-new-pass"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn version_lifecycle_and_checks() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let akey = create_app(&app, &token, "My App").await;
    assert!(akey.starts_with("app_"));

    // First version becomes latest even when not requested.
    let v1 = create_version(&app, &token, &akey, "1.0.0", false).await;
    assert!(v1.starts_with("ver_"));
    let (_, body) = send(&app, Method::GET, &format!("/api/versions/{v1}"), Some(&token), None).await;
    assert_eq!(body["is_latest"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/check/legality",
        None,
        Some(json!({"akey": akey, "vkey": v1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["legal"], true);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/check/update",
        None,
        Some(json!({"akey": akey, "vkey": v1})),
    )
    .await;
    assert_eq!(body["has_update"], false);

    let v2 = create_version(&app, &token, &akey, "1.1.0", true).await;
    let (_, body) = send(&app, Method::GET, &format!("/api/versions/{v1}"), Some(&token), None).await;
    assert_eq!(body["is_latest"], false);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/check/update",
        None,
        Some(json!({"akey": akey, "vkey": v1})),
    )
    .await;
    assert_eq!(body["has_update"], true);
    assert_eq!(body["latest_version"], "1.1.0");
    assert_eq!(body["is_forced_update"], false);
    assert!(body["release_time"].is_string());

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/check/validate",
        None,
        Some(json!({"akey": akey, "vkey": v2})),
    )
    .await;
    assert_eq!(body["valid"], true);
    assert_eq!(body["app_name"], "My App");
    assert_eq!(body["version"], "1.1.0");

    // Deleting the latest re-elects the remaining version.
    let (status, _) = send(&app, Method::DELETE, &format!("/api/versions/{v2}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, &format!("/api/versions/{v1}"), Some(&token), None).await;
    assert_eq!(body["is_latest"], true);

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/apps/{akey}/versions"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn illegal_pairs_share_one_public_message() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let a1 = create_app(&app, &token, "First").await;
    let a2 = create_app(&app, &token, "Second").await;
    let v2 = create_version(&app, &token, &a2, "1.0.0", true).await;

    let cases = [
        (a1.clone(), v2.clone(), "akey_mismatch"),
        ("app_missing".to_owned(), "ver_missing".to_owned(), "akey_not_found"),
        (a2.clone(), "ver_missing".to_owned(), "vkey_not_found"),
    ];
    for (akey, vkey, reason) in cases {
        let pair = json!({"akey": akey, "vkey": vkey});

        let (status, body) =
            send(&app, Method::POST, "/api/check/legality", None, Some(pair.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["legal"], false);
        assert_eq!(body["message"], "verification failed");

        let (_, body) = send(&app, Method::POST, "/api/check/update", None, Some(pair.clone())).await;
        assert_eq!(body["has_update"], false);

        let (status, body) =
            send(&app, Method::POST, "/api/check/diagnose", Some(&token), Some(pair)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reason"], reason);
    }
}

#[tokio::test]
async fn check_requires_both_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/check/legality",
        None,
        Some(json!({"akey": "", "vkey": "ver_x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validation_errors_are_400() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/apps",
        Some(&token),
        Some(json!({"name": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let akey = create_app(&app, &token, "Valid").await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/apps/{akey}/versions"),
        Some(&token),
        Some(json!({"version": "1.0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_keys_are_scoped_to_their_apps() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let admin = login(&app).await;

    let alice = create_api_key(&app, &admin, "alice").await;
    let bob = create_api_key(&app, &admin, "bob").await;

    let akey = create_app(&app, &alice, "Alice App").await;
    let vkey = create_version(&app, &alice, &akey, "0.1.0", true).await;

    let (_, body) = send(&app, Method::GET, "/api/apps", Some(&alice), None).await;
    assert_eq!(body["total"], 1);
    let (_, body) = send(&app, Method::GET, "/api/apps", Some(&bob), None).await;
    assert_eq!(body["total"], 0);
    let (_, body) = send(&app, Method::GET, "/api/apps", Some(&admin), None).await;
    assert_eq!(body["total"], 1);

    let (status, _) = send(&app, Method::GET, &format!("/api/apps/{akey}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::DELETE, &format!("/api/versions/{vkey}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, Method::GET, "/api/dashboard/stats", Some(&bob), None).await;
    assert_eq!(body["total_apps"], 0);
    let (_, body) = send(&app, Method::GET, "/api/dashboard/stats", Some(&alice), None).await;
    assert_eq!(body["total_apps"], 1);
    assert_eq!(body["total_versions"], 1);

    // Admin-only routes.
    let (status, _) = send(&app, Method::GET, "/api/keys", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/apps/{akey}/ban"),
        Some(&alice),
        Some(json!({"banned": true})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/apps/{akey}"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ban_does_not_affect_legality() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;

    let akey = create_app(&app, &token, "Banned App").await;
    let vkey = create_version(&app, &token, &akey, "2.0.0", true).await;

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/apps/{akey}/ban"),
        Some(&token),
        Some(json!({"banned": true, "reason": "abuse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_banned"], true);
    assert_eq!(body["ban_reason"], "abuse");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/check/legality",
        None,
        Some(json!({"akey": akey, "vkey": vkey})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn revoked_api_key_stops_working() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let admin = login(&app).await;

    let (_, created) = send(
        &app,
        Method::POST,
        "/api/keys",
        Some(&admin),
        Some(json!({"label": "ci"})),
    )
    .await;
    let key = created["key"].as_str().unwrap().to_owned();
    let id = created["id"].as_str().unwrap().to_owned();

    let (status, _) = send(&app, Method::GET, "/api/apps", Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&app, Method::GET, "/api/keys", Some(&admin), None).await;
    assert_eq!(listed["keys"].as_array().unwrap().len(), 1);
    assert!(listed["keys"][0].get("key_hash").is_none());

    let (status, _) = send(&app, Method::DELETE, &format!("/api/keys/{id}"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::DELETE, &format!("/api/keys/{id}"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/apps", Some(&key), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn huge_page_number_returns_empty_list() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;
    let akey = create_app(&app, &token, "Paged").await;
    create_version(&app, &token, &akey, "1.0.0", true).await;

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/apps?page=9223372036854775807&size=10",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["list"], json!([]));

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/apps/{akey}/versions?page=9223372036854775807&size=100"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["list"], json!([]));
}

#[tokio::test]
async fn version_update_without_latest_flag_hands_latest_over() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let token = login(&app).await;
    let akey = create_app(&app, &token, "Flags").await;
    let v1 = create_version(&app, &token, &akey, "1.0.0", true).await;
    let v2 = create_version(&app, &token, &akey, "1.1.0", true).await;

    // Only the description is sent; the missing flag reads as false.
    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/versions/{v2}"),
        Some(&token),
        Some(json!({"description": "notes"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_latest"], false);
    assert_eq!(body["description"], "notes");
    assert_eq!(body["version"], "1.1.0");

    let (_, body) = send(&app, Method::GET, &format!("/api/versions/{v1}"), Some(&token), None).await;
    assert_eq!(body["is_latest"], true);
}

#[tokio::test]
async fn announcements_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(&tmp);
    let admin = login(&app).await;
    let user = create_api_key(&app, &admin, "viewer").await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/dashboard/announcements",
        Some(&user),
        Some(json!({"title": "nope", "content": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/dashboard/announcements",
        Some(&admin),
        Some(json!({"title": "", "content": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut ids = Vec::new();
    for (title, date) in [
        ("Older", "2024-01-01T00:00:00Z"),
        ("Newer", "2025-01-01T00:00:00Z"),
    ] {
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/dashboard/announcements",
            Some(&admin),
            Some(json!({"title": title, "content": "hello", "publish_date": date})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        ids.push(body["id"].as_str().unwrap().to_owned());
    }

    let (status, body) = send(&app, Method::GET, "/api/dashboard/announcements", Some(&user), None).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<_> = body["list"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["title"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(titles, ["Newer", "Older"]);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/dashboard/announcements/{}", ids[1]),
        Some(&admin),
        Some(json!({"is_active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, "/api/dashboard/announcements", Some(&user), None).await;
    assert_eq!(body["list"].as_array().unwrap().len(), 1);
    assert_eq!(body["list"][0]["title"], "Older");

    let (status, _) = send(&app, Method::GET, "/api/dashboard/announcements", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
