use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rehearse_call::{CallRegistry, ScriptedConnector};
use rehearse_db::{create_pool, run_migrations, DbRuntimeSettings};
use rehearse_review::{
    RetryPolicy, ReviewError, ReviewFetchRegistry, ReviewRequest, ScoreSource,
};
use rehearse_server::{app, AppState};
use rehearse_types::Review;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for oneshot

/// Scoring stub: fails `succeed_after` times with "not ready", then
/// returns a fixed review. Counts every call.
struct StubScore {
    calls: AtomicU32,
    succeed_after: u32,
}

impl StubScore {
    fn new(succeed_after: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            succeed_after,
        }
    }
}

#[async_trait]
impl ScoreSource for StubScore {
    async fn fetch_once(&self, _request: &ReviewRequest) -> Result<Review, ReviewError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.succeed_after {
            Ok(serde_json::from_value(serde_json::json!({
                "overall_score": 82.5,
                "sub_scores": {"communication": 90.0, "technical_depth": 75.0},
                "recommendation": "hire",
                "summary": "Strong communicator."
            }))
            .unwrap())
        } else {
            Err(ReviewError::NotReady)
        }
    }
}

/// A fast retry profile so exhausted cycles finish in milliseconds.
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(10),
        backoff_factor: 2,
        max_delay: Duration::from_millis(40),
        max_retries: 2,
    }
}

fn build_state(source: Arc<dyn ScoreSource>) -> (AppState, tempfile::NamedTempFile) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(
        db_file.path().to_str().unwrap(),
        DbRuntimeSettings::default(),
    )
    .unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }
    let state = AppState {
        pool,
        calls: CallRegistry::new(),
        reviews: ReviewFetchRegistry::new(),
        connector: Arc::new(ScriptedConnector::canned_interview()),
        score_source: source,
        review_policy: fast_policy(),
    };
    (state, db_file)
}

/// Seeds an entity plus a session in the given status; returns the
/// session id. `private` adds the invite gate.
fn seed_session(state: &AppState, status: &str, private: bool) -> String {
    let conn = state.pool.get().unwrap();
    conn.execute(
        "INSERT INTO organizations (slug, label) VALUES ('acme', 'Acme')",
        [],
    )
    .unwrap();
    let (visibility, entity_status) = if private {
        ("private", "invite_only")
    } else {
        ("public", "published")
    };
    conn.execute(
        "INSERT INTO entities (org_id, kind, title, description, status, visibility)
         VALUES (1, 'interview', 'Backend Interview', '', ?1, ?2)",
        rusqlite::params![entity_status, visibility],
    )
    .unwrap();
    if private {
        conn.execute(
            "INSERT INTO invites (code, entity_id, org_id) VALUES ('ABC123', 1, 1)",
            [],
        )
        .unwrap();
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions (id, entity_id, org_id, status, transcript, metadata_json)
         VALUES (?1, 1, 1, ?2, 'Agent: Hello.', '{}')",
        rusqlite::params![session_id, status],
    )
    .unwrap();
    session_id
}

async fn get_review(app: &Router, session_id: &str, token: Option<&str>) -> (StatusCode, Value) {
    let uri = match token {
        Some(token) => format!("/api/sessions/{session_id}/review?token={token}"),
        None => format!("/api/sessions/{session_id}/review"),
    };
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Polls the review endpoint until it leaves `pending` or times out.
async fn wait_past_pending(app: &Router, session_id: &str) -> Value {
    for _ in 0..200 {
        let (status, json) = get_review(app, session_id, None).await;
        assert_eq!(status, StatusCode::OK);
        if json["review_status"] != "pending" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("review for {session_id} stayed pending");
}

#[tokio::test]
async fn review_moves_from_pending_to_ready() {
    let source = Arc::new(StubScore::new(1));
    let (state, _db) = build_state(source.clone());
    let session_id = seed_session(&state, "completed", false);
    let app = app(state);

    // First call kicks the cycle off.
    let (status, json) = get_review(&app, &session_id, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["review_status"], "pending");

    let json = wait_past_pending(&app, &session_id).await;
    assert_eq!(json["review_status"], "ready");
    assert_eq!(json["review"]["overall_score"], 82.5);
    assert_eq!(json["review"]["recommendation"], "hire");
    assert_eq!(json["review"]["sub_scores"]["communication"], 90.0);

    // One failure, then the success: exactly two calls.
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable_without_refetching() {
    let source = Arc::new(StubScore::new(u32::MAX));
    let (state, _db) = build_state(source.clone());
    let session_id = seed_session(&state, "completed", false);
    let app = app(state);

    get_review(&app, &session_id, None).await;
    let json = wait_past_pending(&app, &session_id).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["review_status"], "unavailable");
    assert!(json["error"].as_str().unwrap().contains("no review available"));

    // max_retries = 2 means exactly 3 calls total.
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);

    // Reading again reports the terminal state without new attempts.
    let (_, json) = get_review(&app, &session_id, None).await;
    assert_eq!(json["review_status"], "unavailable");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn no_review_for_an_unfinished_session() {
    let source = Arc::new(StubScore::new(0));
    let (state, _db) = build_state(source.clone());
    let session_id = seed_session(&state, "in_progress", false);
    let app = app(state);

    let (status, json) = get_review(&app, &session_id, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);

    // The scoring service was never contacted.
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn review_access_is_rechecked_per_request() {
    let source = Arc::new(StubScore::new(0));
    let (state, _db) = build_state(source);
    let session_id = seed_session(&state, "completed", true);
    let app = app(state);

    // The invite token must be presented on the review fetch itself.
    let (status, _) = get_review(&app, &session_id, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get_review(&app, &session_id, Some("WRONG")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = get_review(&app, &session_id, Some("ABC123")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
}
