//! Integration tests for the Group Checkout process manager: the HTTP
//! request schedules member checkouts, and the background subscription
//! folds their outcomes back into the group.

mod common;

use axum::Router;
use axum::http::StatusCode;
use sqlx::PgPool;
use stayline_core::event_log::EventLog;
use stayline_event_store::PgEventLog;
use stayline_group_checkout::domain::events::{
    GROUP_CHECKOUT_COMPLETED_EVENT_TYPE, GROUP_CHECKOUT_FAILED_EVENT_TYPE,
    GROUP_CHECKOUT_INITIATED_EVENT_TYPE, GUEST_CHECKOUT_COMPLETED_EVENT_TYPE,
    GUEST_CHECKOUT_FAILED_EVENT_TYPE,
};
use uuid::Uuid;

/// Check in a guest and, when `balance` is positive, leave it unpaid.
async fn guest_with_balance(app: &Router, balance: i64) -> Uuid {
    let guest_stay_id = Uuid::new_v4();
    let (status, headers, _) = common::send(
        app,
        "POST",
        "/api/v1/guest-stays",
        None,
        Some(&serde_json::json!({ "guest_stay_id": guest_stay_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    if balance > 0 {
        let (status, _, _) = common::send(
            app,
            "POST",
            &format!("/api/v1/guest-stays/{guest_stay_id}/charges"),
            Some(&common::etag(&headers)),
            Some(&serde_json::json!({ "amount": balance })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    guest_stay_id
}

async fn wait_for_status(app: &Router, group_checkout_id: Uuid, expected: &'static str) {
    let router = app.clone();
    common::eventually(&format!("group checkout to be {expected}"), move || {
        let router = router.clone();
        async move {
            let (_, json) =
                common::get_json(&router, &format!("/api/v1/group-checkouts/{group_checkout_id}"))
                    .await;
            json["status"] == expected
        }
    })
    .await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_group_checkout_completes_when_every_member_checks_out(pool: PgPool) {
    let app = common::spawn_test_app(pool.clone());
    let members = [
        guest_with_balance(&app.router, 0).await,
        guest_with_balance(&app.router, 0).await,
    ];
    let group_checkout_id = Uuid::new_v4();

    let (status, json) = common::post_json(
        &app.router,
        "/api/v1/group-checkouts",
        &serde_json::json!({
            "group_checkout_id": group_checkout_id,
            "clerk_id": Uuid::new_v4(),
            "guest_stay_ids": members,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "initiated");

    wait_for_status(&app.router, group_checkout_id, "completed").await;

    for guest_stay_id in members {
        let (_, json) =
            common::get_json(&app.router, &format!("/api/v1/guest-stays/{guest_stay_id}")).await;
        assert_eq!(json["status"], "checked_out");
    }

    let published: Vec<String> = PgEventLog::new(pool)
        .read_stream(group_checkout_id)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        published,
        vec![
            GROUP_CHECKOUT_INITIATED_EVENT_TYPE,
            GUEST_CHECKOUT_COMPLETED_EVENT_TYPE,
            GUEST_CHECKOUT_COMPLETED_EVENT_TYPE,
            GROUP_CHECKOUT_COMPLETED_EVENT_TYPE,
        ]
    );

    app.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_group_checkout_fails_when_a_member_has_an_open_balance(pool: PgPool) {
    let app = common::spawn_test_app(pool.clone());
    let settled = guest_with_balance(&app.router, 0).await;
    let unsettled = guest_with_balance(&app.router, 3000).await;
    let group_checkout_id = Uuid::new_v4();

    let (status, _) = common::post_json(
        &app.router,
        "/api/v1/group-checkouts",
        &serde_json::json!({
            "group_checkout_id": group_checkout_id,
            "clerk_id": Uuid::new_v4(),
            "guest_stay_ids": [settled, unsettled],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_for_status(&app.router, group_checkout_id, "failed").await;

    let (_, json) = common::get_json(
        &app.router,
        &format!("/api/v1/group-checkouts/{group_checkout_id}"),
    )
    .await;
    let member_status = |id: Uuid| {
        json["members"]
            .as_array()
            .unwrap()
            .iter()
            .find(|member| member["guest_stay_id"] == id.to_string())
            .map(|member| member["status"].clone())
            .unwrap()
    };
    assert_eq!(member_status(settled), "completed");
    assert_eq!(member_status(unsettled), "failed");

    let (_, json) =
        common::get_json(&app.router, &format!("/api/v1/guest-stays/{unsettled}")).await;
    assert_eq!(json["status"], "open");

    let published: Vec<String> = PgEventLog::new(pool)
        .read_stream(group_checkout_id)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(published.first().map(String::as_str), Some(GROUP_CHECKOUT_INITIATED_EVENT_TYPE));
    assert_eq!(published.last().map(String::as_str), Some(GROUP_CHECKOUT_FAILED_EVENT_TYPE));
    assert!(published.iter().any(|t| t == GUEST_CHECKOUT_FAILED_EVENT_TYPE));

    app.stop().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_group_checkout_reusing_an_id_returns_409(pool: PgPool) {
    let app = common::spawn_test_app(pool);
    let member = guest_with_balance(&app.router, 0).await;
    let body = serde_json::json!({
        "group_checkout_id": Uuid::new_v4(),
        "clerk_id": Uuid::new_v4(),
        "guest_stay_ids": [member],
    });

    let (status, _) = common::post_json(&app.router, "/api/v1/group-checkouts", &body).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, json) = common::post_json(&app.router, "/api/v1/group-checkouts", &body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "stream_already_exists");

    app.stop().await;
}
