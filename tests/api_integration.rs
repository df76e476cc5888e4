//! Integration tests for the onboarding REST API.
//!
//! Each test spins up an Axum server on a random port backed by an
//! in-memory store and drives it over HTTP with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use onboarding_engine::OnboardingEngine;
use onboarding_engine::analytics::TracingSink;
use onboarding_engine::config::EngineConfig;
use onboarding_engine::milestones::MilestoneCatalog;
use onboarding_engine::paths::StaticPathSource;
use onboarding_engine::routes::api_routes;
use onboarding_engine::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return its base URL.
async fn start_server() -> String {
    let db = LibSqlBackend::new_memory().await.unwrap();
    let engine = OnboardingEngine::new(
        Arc::new(db),
        Arc::new(StaticPathSource::builtin()),
        MilestoneCatalog::builtin(),
        Arc::new(TracingSink),
        EngineConfig {
            cache_dir: std::env::temp_dir().join(format!("onboarding-api-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        },
    );
    let app = api_routes(engine);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

/// Helper: begin onboarding and return the session id.
async fn begin(client: &reqwest::Client, base: &str, role: &str) -> String {
    let resp = client
        .post(format!("{base}/api/sessions"))
        .json(&json!({"user_id": "u1", "role": role}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["session"]["session_id"].as_str().unwrap().to_string()
}

async fn complete_step(client: &reqwest::Client, base: &str, sid: &str, step: &str) -> reqwest::Response {
    client
        .post(format!("{base}/api/sessions/{sid}/steps/{step}/complete"))
        .json(&json!({"success": true, "time_spent": 10}))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn full_onboarding_flow() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let sid = begin(&client, &base, "designer").await;

        let next: Value = client
            .get(format!("{base}/api/sessions/{sid}/next-step"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(next["next_step"]["step_id"], "welcome");

        for step in ["welcome", "profile", "review"] {
            let resp = complete_step(&client, &base, &sid, step).await;
            assert_eq!(resp.status(), 200);
        }

        let progress: Value = client
            .get(format!("{base}/api/sessions/{sid}/progress"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(progress["completion_percentage"], 100.0);
        assert_eq!(progress["completed_steps"], 3);

        let resp = client
            .post(format!("{base}/api/sessions/{sid}/complete"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let cert: Value = client
            .get(format!("{base}/api/sessions/{sid}/certificate"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cert["session_id"], sid.as_str());
        assert_eq!(cert["completed_steps"].as_array().unwrap().len(), 3);

        let report: Value = client
            .get(format!("{base}/api/reports/paths/default-v1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["session_count"], 1);
        assert_eq!(report["completed_sessions"], 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn error_kinds_map_to_status_codes() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base}/api/sessions/missing/progress"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "not_found");

        let sid = begin(&client, &base, "designer").await;

        let resp = client
            .get(format!("{base}/api/sessions/{sid}/certificate"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "session_not_complete");

        // Completing without the required steps.
        let resp = client
            .post(format!("{base}/api/sessions/{sid}/complete"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);

        complete_step(&client, &base, &sid, "welcome").await;
        let resp = complete_step(&client, &base, &sid, "welcome").await;
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "validation");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_attempts_surface_blockers() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let sid = begin(&client, &base, "developer").await;

        let resp = client
            .post(format!("{base}/api/sessions/{sid}/steps/first_request/complete"))
            .json(&json!({"success": false, "error": "upstream returned HTTP 502", "time_spent": 30}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let outcome: Value = resp.json().await.unwrap();
        assert_eq!(outcome["record"]["status"], "failed");

        let blockers: Value = client
            .get(format!("{base}/api/sessions/{sid}/blockers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let blockers = blockers.as_array().unwrap();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0]["category"], "technical");
        assert_eq!(blockers[0]["related_step_id"], "first_request");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn track_step_and_badges() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let sid = begin(&client, &base, "admin").await;

        let resp = client
            .put(format!("{base}/api/sessions/{sid}/steps/welcome"))
            .json(&json!({"status": "in_progress", "time_spent": 12}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let record: Value = resp.json().await.unwrap();
        assert_eq!(record["time_spent"], 12);
        assert!(record.get("warnings").is_none());

        let resp = client
            .post(format!("{base}/api/sessions/{sid}/sync"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let synced: Value = resp.json().await.unwrap();
        assert_eq!(synced["pushed"], 0);
        assert_eq!(synced["records"][0]["step_id"], "welcome");

        let resp = client
            .put(format!("{base}/api/sessions/{sid}/steps/nope"))
            .json(&json!({"status": "in_progress"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let badges: Value = client
            .get(format!("{base}/api/sessions/{sid}/badges"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(
            badges
                .as_array()
                .unwrap()
                .iter()
                .all(|b| b["earned"] == false)
        );

        let resp = client
            .get(format!("{base}/api/sessions/missing/badges"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}
