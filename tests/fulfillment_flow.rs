mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, body_to_vec, TestApp};
use serde_json::json;
use uuid::Uuid;

const TEMPLATE: &str = r#"{"variants": [
    "To {{RECIPIENT_NAME}} ({{NET_ID}}): {{MESSAGE}} -- {{SENDER_NAME}}",
    "Pin variant for {{RECIPIENT_NAME}}: {{MESSAGE}}"
]}"#;

async fn seeded_group(app: &TestApp) -> Result<(Uuid, String)> {
    app.insert_user("admin@cornell.edu", "pw", "admin").await?;
    let admin = app.login_token("admin@cornell.edu", "pw").await?;

    let group_id = app.insert_group("sp25", "Spring 2025", false).await?;
    app.insert_card(group_id, "a@cornell.edu", "zoe@cornell.edu", "Zoe", "late thanks")
        .await?;
    app.insert_card(group_id, "b@cornell.edu", "abe@cornell.edu", "Abe", "early thanks")
        .await?;

    let template = app
        .put_bytes(
            &format!("/api/groups/{group_id}/template"),
            TEMPLATE.as_bytes().to_vec(),
            Some(&admin),
        )
        .await?;
    assert_eq!(template.status(), StatusCode::NO_CONTENT);

    Ok((group_id, admin))
}

#[tokio::test]
async fn double_trigger_returns_the_active_run() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (group_id, admin) = seeded_group(&app).await?;

    let first = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": true }),
            Some(&admin),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_body = body_to_json(first.into_body()).await?;

    let second = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": true }),
            Some(&admin),
        )
        .await?;
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = body_to_json(second.into_body()).await?;

    assert_eq!(first_body["id"], second_body["id"]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn worker_renders_all_requested_formats() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (group_id, admin) = seeded_group(&app).await?;

    let trigger = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": true, "ordering": "alphabetical" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(trigger.status(), StatusCode::ACCEPTED);
    let run = body_to_json(trigger.into_body()).await?;
    let run_id: Uuid = serde_json::from_value(run["id"].clone())?;
    assert_eq!(run["status"], "queued");

    assert!(app.run_worker_once().await?);

    let poll = app
        .get(&format!("/api/fulfillment/{run_id}"), Some(&admin))
        .await?;
    assert_eq!(poll.status(), StatusCode::OK);
    let polled = body_to_json(poll.into_body()).await?;
    assert_eq!(polled["status"], "done");
    assert_eq!(polled["csv_status"], "done");
    assert_eq!(polled["deck_status"], "done");
    assert_eq!(polled["doc_status"], "done");
    assert_eq!(polled["deck_progress"], 100);

    let csv = app
        .get(&format!("/api/fulfillment/{run_id}/csv"), Some(&admin))
        .await?;
    assert_eq!(csv.status(), StatusCode::OK);
    let csv_text = String::from_utf8(body_to_vec(csv.into_body()).await?)?;
    // Alphabetical ordering puts Abe before Zoe.
    let abe = csv_text.find("abe@cornell.edu").expect("abe row missing");
    let zoe = csv_text.find("zoe@cornell.edu").expect("zoe row missing");
    assert!(abe < zoe);

    let deck = app
        .get(&format!("/api/fulfillment/{run_id}/deck"), Some(&admin))
        .await?;
    assert_eq!(deck.status(), StatusCode::OK);

    let document = app
        .get(&format!("/api/fulfillment/{run_id}/document"), Some(&admin))
        .await?;
    assert_eq!(document.status(), StatusCode::OK);
    let doc_text = String::from_utf8(body_to_vec(document.into_body()).await?)?;
    assert!(doc_text.contains("To Zoe (zoe): late thanks"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deck_failure_leaves_csv_downloadable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (group_id, admin) = seeded_group(&app).await?;
    app.renderer().set_fail_deck(true);

    let trigger = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": true }),
            Some(&admin),
        )
        .await?;
    let run = body_to_json(trigger.into_body()).await?;
    let run_id: Uuid = serde_json::from_value(run["id"].clone())?;

    assert!(app.run_worker_once().await?);

    let poll = app
        .get(&format!("/api/fulfillment/{run_id}"), Some(&admin))
        .await?;
    let polled = body_to_json(poll.into_body()).await?;
    assert_eq!(polled["status"], "failed");
    assert_eq!(polled["csv_status"], "done");
    assert_eq!(polled["deck_status"], "failed");
    assert_eq!(polled["doc_status"], "failed");

    let csv = app
        .get(&format!("/api/fulfillment/{run_id}/csv"), Some(&admin))
        .await?;
    assert_eq!(csv.status(), StatusCode::OK);

    let deck = app
        .get(&format!("/api/fulfillment/{run_id}/deck"), Some(&admin))
        .await?;
    assert_eq!(deck.status(), StatusCode::NOT_FOUND);

    // A completed (even failed) run no longer blocks a new trigger.
    app.renderer().set_fail_deck(false);
    let retrigger = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": false }),
            Some(&admin),
        )
        .await?;
    assert_eq!(retrigger.status(), StatusCode::ACCEPTED);
    let new_run = body_to_json(retrigger.into_body()).await?;
    assert_ne!(new_run["id"], run["id"]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn csv_only_runs_skip_deck_and_document() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (group_id, admin) = seeded_group(&app).await?;

    let trigger = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": false }),
            Some(&admin),
        )
        .await?;
    let run = body_to_json(trigger.into_body()).await?;
    let run_id: Uuid = serde_json::from_value(run["id"].clone())?;
    assert_eq!(run["deck_status"], "not_requested");

    assert!(app.run_worker_once().await?);

    let poll = app
        .get(&format!("/api/fulfillment/{run_id}"), Some(&admin))
        .await?;
    let polled = body_to_json(poll.into_body()).await?;
    assert_eq!(polled["status"], "done");
    assert_eq!(polled["csv_status"], "done");
    assert_eq!(polled["deck_status"], "not_requested");
    assert_eq!(polled["doc_status"], "not_requested");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bulk_export_follows_swap_resolution() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@cornell.edu", "pw", "admin").await?;
    app.insert_user("swapper@cornell.edu", "pw", "user").await?;
    let admin = app.login_token("admin@cornell.edu", "pw").await?;
    let swapper = app.login_token("swapper@cornell.edu", "pw").await?;

    let physical_id = app.insert_group("physical", "Physical Cards", false).await?;
    let virtual_id = app.insert_group("virtual", "Virtual Cards", false).await?;
    app.set_setting("swap_from", "physical").await?;
    app.set_setting("swap_to", "virtual").await?;

    // Both cards predate the opt-in and are stored in the source group.
    app.insert_card(
        physical_id,
        "a@cornell.edu",
        "swapper@cornell.edu",
        "Swapper",
        "moving thanks",
    )
    .await?;
    app.insert_card(
        physical_id,
        "b@cornell.edu",
        "stayer@cornell.edu",
        "Stayer",
        "staying thanks",
    )
    .await?;

    let opt_in = app.post_json("/api/swaps", &json!({}), Some(&swapper)).await?;
    assert_eq!(opt_in.status(), StatusCode::OK);

    let export_csv = |group_id: Uuid| {
        let app = &app;
        let admin = &admin;
        async move {
            let trigger = app
                .post_json(
                    &format!("/api/groups/{group_id}/fulfillment"),
                    &json!({ "include_deck": false }),
                    Some(admin),
                )
                .await?;
            assert_eq!(trigger.status(), StatusCode::ACCEPTED);
            let run = body_to_json(trigger.into_body()).await?;
            let run_id: Uuid = serde_json::from_value(run["id"].clone())?;

            assert!(app.run_worker_once().await?);

            let csv = app
                .get(&format!("/api/fulfillment/{run_id}/csv"), Some(admin))
                .await?;
            assert_eq!(csv.status(), StatusCode::OK);
            anyhow::Ok(String::from_utf8(body_to_vec(csv.into_body()).await?)?)
        }
    };

    // The opted-in recipient's card exports under the destination group.
    let virtual_csv = export_csv(virtual_id).await?;
    assert!(virtual_csv.contains("swapper@cornell.edu"));
    assert!(!virtual_csv.contains("stayer@cornell.edu"));

    let physical_csv = export_csv(physical_id).await?;
    assert!(physical_csv.contains("stayer@cornell.edu"));
    assert!(!physical_csv.contains("swapper@cornell.edu"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn the_all_time_aggregate_is_not_a_fulfillment_target() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@cornell.edu", "pw", "admin").await?;
    let admin = app.login_token("admin@cornell.edu", "pw").await?;

    // Seeded directly; the API refuses to create a group with this slug.
    let all_id = app.insert_group("all", "All Time", false).await?;

    let trigger = app
        .post_json(
            &format!("/api/groups/{all_id}/fulfillment"),
            &json!({ "include_deck": false }),
            Some(&admin),
        )
        .await?;
    assert_eq!(trigger.status(), StatusCode::UNPROCESSABLE_ENTITY);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_ordering_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (group_id, admin) = seeded_group(&app).await?;

    let trigger = app
        .post_json(
            &format!("/api/groups/{group_id}/fulfillment"),
            &json!({ "include_deck": false, "ordering": "reverse" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(trigger.status(), StatusCode::UNPROCESSABLE_ENTITY);

    app.cleanup().await?;
    Ok(())
}
