mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn login_and_me_round_trip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("user@cornell.edu", "correct horse", "user")
        .await?;

    let bad = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "user@cornell.edu", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

    let token = app.login_token("user@cornell.edu", "correct horse").await?;

    let me = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_to_json(me.into_body()).await?;
    assert_eq!(body["username"], "user@cornell.edu");
    assert_eq!(body["role"], "user");

    let anonymous = app.get("/api/auth/me", None).await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn user_management_is_admin_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@cornell.edu", "pw", "admin").await?;
    app.insert_user("user@cornell.edu", "pw", "user").await?;
    let admin = app.login_token("admin@cornell.edu", "pw").await?;
    let user = app.login_token("user@cornell.edu", "pw").await?;

    let payload = json!({ "username": "new@cornell.edu", "password": "pw2" });

    let forbidden = app.post_json("/api/users", &payload, Some(&user)).await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let created = app.post_json("/api/users", &payload, Some(&admin)).await?;
    assert_eq!(created.status(), StatusCode::OK);
    let created_body = body_to_json(created.into_body()).await?;
    assert_eq!(created_body["role"], "user");
    let new_id: Uuid = serde_json::from_value(created_body["id"].clone())?;

    let duplicate = app.post_json("/api/users", &payload, Some(&admin)).await?;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let not_an_email = app
        .post_json(
            "/api/users",
            &json!({ "username": "plainname", "password": "pw" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(not_an_email.status(), StatusCode::BAD_REQUEST);

    let removed = app
        .delete(&format!("/api/users/{new_id}"), Some(&admin))
        .await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}
