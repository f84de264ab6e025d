mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{token, TestApp};
use mylife_gateway::registry::Collection;
use serde_json::{json, Value};

#[tokio::test]
async fn unknown_entity_is_rejected_without_touching_storage() -> Result<()> {
    let app = TestApp::new();
    let t = token("u1");

    let (status, body) = app.get("/sync/passwords", &t).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Invalid entity \"passwords\". Allowed: habits, dsa, health, journal, tasks, goals, notifications"
    );

    let (status, _) = app
        .post("/sync/users/sync", &t, json!({"items": [{"id": "x"}]}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn oversized_batch_is_rejected_and_nothing_is_written() -> Result<()> {
    let app = TestApp::new();
    let items: Vec<Value> = (0..501).map(|i| json!({"id": format!("r{}", i)})).collect();

    let (status, body) = app
        .post("/sync/habits/sync", &token("u1"), json!({"items": items}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Batch size exceeds maximum of 500 items");
    assert_eq!(app.store.calls(), 0);
    assert_eq!(app.store.writes(), 0);
    Ok(())
}

#[tokio::test]
async fn batch_limit_follows_configuration() -> Result<()> {
    let app = TestApp::builder().max_batch(2).build();
    let (status, _) = app
        .post("/sync/habits/sync", &token("u1"), json!({"items": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn items_must_be_an_array() -> Result<()> {
    let app = TestApp::new();
    let t = token("u1");
    for body in [json!({}), json!({"items": {"id": "r1"}}), json!([1, 2])] {
        let (status, body) = app.post("/sync/tasks/sync", &t, body).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "\"items\" must be an array");
    }
    assert_eq!(app.store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn empty_batch_is_a_no_op() -> Result<()> {
    let app = TestApp::new();
    let (status, body) = app.post("/sync/goals/sync", &token("u1"), json!({"items": []})).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": [], "upserted": 0}));
    assert_eq!(app.store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn client_supplied_owner_is_overwritten() -> Result<()> {
    let app = TestApp::new();
    let (status, body) = app
        .post(
            "/sync/tasks/sync",
            &token("u1"),
            json!({"items": [{"id": "r1", "user_id": "u2", "title": "x"}]}),
        )
        .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upserted"], 1);
    assert_eq!(body["data"][0]["user_id"], "u1");

    let rows = app.rows(Collection::Tasks).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_id"], "u1");
    assert_eq!(rows[0]["title"], "x");
    Ok(())
}

#[tokio::test]
async fn repeating_a_batch_is_idempotent() -> Result<()> {
    let app = TestApp::new();
    let t = token("u1");
    let batch = json!({"items": [{"id": "r1", "title": "a"}, {"id": "r2", "title": "b"}]});

    let (_, first) = app.post("/sync/journal/sync", &t, batch.clone()).await?;
    let (status, second) = app.post("/sync/journal/sync", &t, batch).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["upserted"], 2);
    assert_eq!(second["upserted"], 2);
    assert_eq!(app.rows(Collection::Journal).await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn upsert_replaces_fields_last_write_wins() -> Result<()> {
    let app = TestApp::new();
    let t = token("u1");
    app.post("/sync/goals/sync", &t, json!({"items": [{"id": "g1", "title": "old", "progress": 10}]}))
        .await?;
    app.post("/sync/goals/sync", &t, json!({"items": [{"id": "g1", "title": "new"}]}))
        .await?;

    let rows = app.rows(Collection::Goals).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "new");
    assert!(rows[0].get("progress").is_none());
    Ok(())
}

#[tokio::test]
async fn another_users_row_is_never_rewritten() -> Result<()> {
    let app = TestApp::new();
    app.seed(Collection::Tasks, vec![json!({"id": "r1", "user_id": "u2", "title": "theirs"})])
        .await;

    let (status, body) = app
        .post("/sync/tasks/sync", &token("u1"), json!({"items": [{"id": "r1", "title": "mine"}]}))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upserted"], 0);

    let rows = app.rows(Collection::Tasks).await;
    assert_eq!(rows[0]["user_id"], "u2");
    assert_eq!(rows[0]["title"], "theirs");
    Ok(())
}

#[tokio::test]
async fn read_returns_only_the_callers_rows_newest_first() -> Result<()> {
    let app = TestApp::new();
    app.seed(
        Collection::Health,
        vec![
            json!({"id": "a", "user_id": "u1", "updated_at": "2024-01-01T00:00:00.000Z"}),
            json!({"id": "b", "user_id": "u1", "updated_at": "2024-06-01T00:00:00.000Z"}),
            json!({"id": "c", "user_id": "u2", "updated_at": "2024-03-01T00:00:00.000Z"}),
        ],
    )
    .await;

    let (status, body) = app.get("/sync/health", &token("u1")).await?;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["b", "a"]);
    Ok(())
}

#[tokio::test]
async fn storage_failure_is_a_generic_internal_error_in_production() -> Result<()> {
    let app = TestApp::builder().production().build();
    app.store.set_failing(true);

    let (status, body) = app.get("/sync/dsa", &token("u1")).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal Server Error", "message": "Failed to fetch data"}));

    let (status, body) = app
        .post("/sync/dsa/sync", &token("u1"), json!({"items": [{"id": "p1"}]}))
        .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to sync data");
    Ok(())
}
