use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thinktank::stages::default_stages;
use thinktank::store::load_snapshot;
use thinktank::{
    LaunchBlocker, MemoryStore, Settings, Snapshot, StageStatus, StageTransition, Workbench,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PLANNING_MODEL: &str = "test/planning";
const REVIEW_MODEL: &str = "test/review";

fn completion(content: &str, cost: f64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": format!("gen-{content}"),
        "choices": [{ "message": { "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15, "cost": cost }
    }))
}

async fn mount(server: &MockServer, model: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": model })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Planning then Review, the two middle stages disabled.
async fn planning_and_review(server: &MockServer) -> (Workbench, MemoryStore) {
    let store = MemoryStore::new();
    let snapshot = Snapshot {
        api_key: "sk-test".into(),
        base_url: server.uri(),
        problem: "Design a cache".into(),
        ..Snapshot::default()
    };
    let wb = Workbench::new(snapshot, Arc::new(store.clone()), None, None).unwrap();
    assert!(wb.toggle_stage("solution").await);
    assert!(wb.toggle_stage("synthesis").await);
    assert!(wb.edit_model("planning", PLANNING_MODEL).await);
    assert!(wb.edit_model("review", REVIEW_MODEL).await);
    (wb, store)
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

async fn wait_until_running(wb: &Workbench) {
    for _ in 0..200 {
        if wb.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pipeline never started");
}

#[tokio::test]
async fn later_stages_receive_earlier_outputs() {
    let server = MockServer::start().await;
    mount(&server, PLANNING_MODEL, completion("Use LRU eviction.", 0.001)).await;
    mount(&server, REVIEW_MODEL, completion("Reviewed: LRU is fine.", 0.002)).await;
    let (wb, _) = planning_and_review(&server).await;

    let report = wb.launch().await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.planned, 2);
    assert_eq!(report.completed, 2);
    assert!(!wb.is_running());

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["model"], PLANNING_MODEL);
    assert_eq!(bodies[0]["messages"][1]["content"], "Problem:\nDesign a cache");
    assert_eq!(bodies[1]["model"], REVIEW_MODEL);
    let review_user = bodies[1]["messages"][1]["content"].as_str().unwrap();
    assert!(review_user.contains("Stage 1 output:\nUse LRU eviction."));

    let run = wb.selected_run().unwrap();
    assert_eq!(run.id, report.run_id);
    assert_eq!(run.problem, "Design a cache");
    let ids: Vec<_> = run.stages.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(ids, ["planning", "review"]);
    for stage in &run.stages {
        assert_eq!(stage.status, StageStatus::Complete);
        assert!(stage.started_at.unwrap() <= stage.completed_at.unwrap());
        assert!(stage.request.is_some());
    }
    assert_eq!(run.stages[1].output.as_deref(), Some("Reviewed: LRU is fine."));

    let summary = run.summary();
    assert_eq!(summary.total_tokens, Some(30));
    assert!((summary.total_cost.unwrap() - 0.003).abs() < 1e-12);
}

#[tokio::test]
async fn first_failure_halts_the_run() {
    let server = MockServer::start().await;
    mount(
        &server,
        PLANNING_MODEL,
        ResponseTemplate::new(401).set_body_string("invalid key"),
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "model": REVIEW_MODEL })))
        .respond_with(completion("unreachable", 0.0))
        .expect(0)
        .mount(&server)
        .await;
    let (wb, _) = planning_and_review(&server).await;

    let report = wb.launch().await.unwrap();
    assert!(!report.succeeded());
    assert_eq!(report.completed, 0);
    assert_eq!(
        report.failure,
        Some(("planning".to_string(), "invalid key".to_string()))
    );

    let run = wb.selected_run().unwrap();
    let planning = run.stage("planning").unwrap();
    assert_eq!(planning.status, StageStatus::Error);
    assert_eq!(planning.error.as_deref(), Some("invalid key"));
    assert!(planning.duration_ms.is_some());
    assert!(planning.output.is_none());

    let review = run.stage("review").unwrap();
    assert_eq!(review.status, StageStatus::Pending);
    assert!(review.started_at.is_none());
    assert!(!wb.is_running());
}

#[tokio::test]
async fn second_launch_while_running_is_ignored() {
    let server = MockServer::start().await;
    mount(
        &server,
        PLANNING_MODEL,
        completion("plan", 0.001).set_delay(Duration::from_millis(300)),
    )
    .await;
    mount(&server, REVIEW_MODEL, completion("review", 0.001)).await;
    let (wb, _) = planning_and_review(&server).await;

    let first = tokio::spawn({
        let wb = wb.clone();
        async move { wb.launch().await }
    });
    wait_until_running(&wb).await;

    assert!(!wb.can_launch());
    assert!(wb.launch().await.is_none());

    let report = first.await.unwrap().unwrap();
    assert!(report.succeeded());
    assert_eq!(wb.snapshot().runs.len(), 1);
    assert!(wb.can_launch());
}

#[tokio::test]
async fn edits_during_a_run_do_not_change_it() {
    let server = MockServer::start().await;
    mount(
        &server,
        PLANNING_MODEL,
        completion("plan", 0.001).set_delay(Duration::from_millis(200)),
    )
    .await;
    mount(&server, REVIEW_MODEL, completion("review", 0.001)).await;
    let (wb, _) = planning_and_review(&server).await;
    let original_prompt = default_stages()[3].system_prompt.clone();

    let running = tokio::spawn({
        let wb = wb.clone();
        async move { wb.launch().await }
    });
    wait_until_running(&wb).await;
    assert!(wb.edit_prompt("review", "Be brief.").await);
    assert!(wb.toggle_stage("solution").await);
    wb.set_problem("Something else").await;

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.planned, 2);
    assert!(report.succeeded());

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[1]["messages"][0]["content"], original_prompt.as_str());
    let review_user = bodies[1]["messages"][1]["content"].as_str().unwrap();
    assert!(review_user.starts_with("Problem:\nDesign a cache"));

    let run = wb.selected_run().unwrap();
    assert_eq!(run.stage("review").unwrap().system_prompt, original_prompt);
    assert!(run.stage("solution").is_none());

    let state = wb.snapshot();
    assert_eq!(state.stages.get("review").unwrap().system_prompt, "Be brief.");
    assert_eq!(state.problem, "Something else");
}

#[tokio::test]
async fn finished_run_survives_reopen() {
    let server = MockServer::start().await;
    mount(&server, PLANNING_MODEL, completion("plan", 0.001)).await;
    mount(&server, REVIEW_MODEL, completion("review", 0.002)).await;
    let (wb, store) = planning_and_review(&server).await;

    let report = wb.launch().await.unwrap();

    let stored = load_snapshot(&store).await.unwrap();
    assert_eq!(stored, wb.snapshot());
    assert_eq!(stored.selected_run_id.as_deref(), Some(report.run_id.as_str()));

    let reopened = Workbench::open(Arc::new(store), &Settings::default()).await.unwrap();
    let run = reopened.selected_run().unwrap();
    assert_eq!(run.id, report.run_id);
    assert!(run
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Complete));
    assert_eq!(reopened.snapshot().api_key, "sk-test");
}

#[tokio::test]
async fn subscribers_see_every_transition_in_order() {
    let server = MockServer::start().await;
    mount(&server, PLANNING_MODEL, completion("plan", 0.001)).await;
    mount(&server, REVIEW_MODEL, completion("review", 0.001)).await;
    let (wb, _) = planning_and_review(&server).await;
    let mut events = wb.subscribe();

    let report = wb.launch().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id, report.run_id);
        let kind = match event.transition {
            StageTransition::Started { .. } => "started",
            StageTransition::Completed { .. } => "completed",
            StageTransition::Failed { .. } => "failed",
        };
        seen.push(format!("{}:{kind}", event.stage_id));
    }
    assert_eq!(
        seen,
        [
            "planning:started",
            "planning:completed",
            "review:started",
            "review:completed"
        ]
    );
}

#[tokio::test]
async fn runs_beyond_the_cap_are_evicted() {
    let server = MockServer::start().await;
    mount(&server, PLANNING_MODEL, completion("plan", 0.0)).await;
    mount(&server, REVIEW_MODEL, completion("review", 0.0)).await;
    let (wb, _) = planning_and_review(&server).await;
    wb.toggle_stage("review").await;

    let mut ids = Vec::new();
    for _ in 0..21 {
        ids.push(wb.launch().await.unwrap().run_id);
    }

    let state = wb.snapshot();
    assert_eq!(state.runs.len(), 20);
    assert_eq!(state.runs.runs()[0].id, ids[20]);
    assert!(state.runs.get(&ids[0]).is_none());
}

#[tokio::test]
async fn missing_credential_blocks_launch() {
    let server = MockServer::start().await;
    let (wb, _) = planning_and_review(&server).await;
    wb.set_api_key("   ").await;

    assert_eq!(wb.launch_blocker(), Some(LaunchBlocker::MissingCredential));
    assert!(wb.launch().await.is_none());
    assert!(wb.snapshot().runs.is_empty());
    assert!(request_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn abandoning_the_launch_future_does_not_abandon_the_run() {
    let server = MockServer::start().await;
    mount(
        &server,
        PLANNING_MODEL,
        completion("plan", 0.001).set_delay(Duration::from_millis(300)),
    )
    .await;
    mount(&server, REVIEW_MODEL, completion("review", 0.001)).await;
    let (wb, store) = planning_and_review(&server).await;

    let waited = tokio::time::timeout(Duration::from_millis(50), wb.launch()).await;
    assert!(waited.is_err());
    assert!(wb.is_running());
    assert!(wb.launch().await.is_none());

    for _ in 0..300 {
        if !wb.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!wb.is_running());

    let state = wb.snapshot();
    assert_eq!(state.runs.len(), 1);
    let run = &state.runs.runs()[0];
    assert!(run.stages.iter().all(|s| s.status == StageStatus::Complete));

    let stored = load_snapshot(&store).await.unwrap();
    assert_eq!(stored, state);
}
