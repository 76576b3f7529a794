use rehearse_call::{AgentEvent, CallRegistry, ScriptStep, ScriptedConnector, TranscriptKind, TranscriptRole};
use rehearse_db::{create_pool, run_migrations, DbRuntimeSettings};
use rehearse_review::{RetryPolicy, ReviewFetchRegistry, ScoringClient};
use rehearse_server::{app, AppState};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::test]
async fn session_event_stream_carries_state_and_transcript() {
    // 1. Setup DB and a paced call script: active quickly, one utterance,
    //    then a hangup late enough for the SSE client to attach.
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let pool = create_pool(
        db_file.path().to_str().unwrap(),
        DbRuntimeSettings::default(),
    )
    .unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO organizations (slug, label) VALUES ('acme', 'Acme');
             INSERT INTO entities (org_id, kind, title, description, status, visibility,
                                   agent_id, agent_credential)
                VALUES (1, 'interview', 'Backend Interview', '', 'published', 'public',
                        'agent-1', 'key-1');",
        )
        .unwrap();
    }

    let connector = ScriptedConnector::new(vec![
        ScriptStep::after_ms(200, AgentEvent::CallStarted),
        ScriptStep::after_ms(
            300,
            AgentEvent::Transcript {
                role: TranscriptRole::Assistant,
                kind: TranscriptKind::Final,
                text: "Welcome to the interview.".to_string(),
                timestamp_ms: 0,
            },
        ),
        ScriptStep::after_ms(100, AgentEvent::VolumeLevel { level: 0.4 }),
        ScriptStep::after_ms(
            500,
            AgentEvent::CallEnded {
                reason: "agent_hangup".to_string(),
            },
        ),
    ]);

    let state = AppState {
        pool,
        calls: CallRegistry::new(),
        reviews: ReviewFetchRegistry::new(),
        connector: Arc::new(connector),
        score_source: Arc::new(ScoringClient::new("http://127.0.0.1:9/score")),
        review_policy: RetryPolicy::default(),
    };

    // 2. Start a real server; SSE needs a streaming connection.
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // 3. Start a session.
    let client = reqwest::Client::new();
    let started: Value = client
        .post(format!("{server_url}/api/entities/1/sessions/start"))
        .send()
        .await
        .expect("failed to start session")
        .json()
        .await
        .unwrap();
    assert_eq!(started["success"], true);
    let session_id = started["session"]["id"].as_str().unwrap().to_string();

    // 4. Attach to the event stream while the call is still connecting.
    let mut response = client
        .get(format!("{server_url}/api/sessions/{session_id}/events"))
        .send()
        .await
        .expect("failed to connect to SSE stream");
    assert!(response.status().is_success());

    // 5. Collect SSE data lines until the terminal event arrives.
    let mut events: Vec<Value> = Vec::new();
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(10);
    'outer: while tokio::time::Instant::now() < deadline {
        let chunk = tokio::time::timeout(tokio::time::Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for SSE chunk")
            .expect("failed to read chunk");
        let Some(chunk) = chunk else { break };
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                let event: Value = serde_json::from_str(data).unwrap();
                let is_end = event["type"] == "ended";
                events.push(event);
                if is_end {
                    break 'outer;
                }
            }
        }
    }

    // The snapshot state arrives first, transcripts and the terminal
    // event follow in call order.
    assert!(!events.is_empty());
    assert_eq!(events[0]["type"], "state");

    let types: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"utterance"));
    assert_eq!(*types.last().unwrap(), "ended");

    let utterance = events.iter().find(|e| e["type"] == "utterance").unwrap();
    assert_eq!(utterance["text"], "Welcome to the interview.");
    assert_eq!(utterance["role"], "assistant");

    let ended = events.last().unwrap();
    assert_eq!(ended["reason"], "agent_hangup");

    // 6. The finalized row agrees with what streamed.
    let session: Value = client
        .get(format!("{server_url}/api/sessions/{session_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["session"]["status"], "completed");
    assert!(session["session"]["transcript"]
        .as_str()
        .unwrap()
        .contains("Welcome to the interview."));
}
