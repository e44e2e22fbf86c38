//! End-to-end tests of the store facade running on the in-process
//! fallback (no Redis candidate configured or reachable).

use std::{sync::Arc, time::Duration};

use live_quiz_store::{
    BackendKind, LiveSessionStore, NewAnswer, NewParticipant, NewSession, Opaque, SessionPatch,
    SessionStatus, StoreConfig, StoreError,
};

fn fallback_config() -> StoreConfig {
    StoreConfig::new().with_key_prefix("quiz-test")
}

async fn store() -> LiveSessionStore {
    LiveSessionStore::init(fallback_config()).await
}

async fn create_abc123(store: &LiveSessionStore) -> String {
    let session = store
        .create_session(NewSession::new("Q1", "H1").with_code("ABC123"))
        .await
        .unwrap();
    session.session_code
}

#[tokio::test]
async fn created_session_reads_back_with_generated_fields() {
    let store = store().await;

    let created = store
        .create_session(
            NewSession::new("Q1", "H1")
                .with_code("abc123")
                .with_max_participants(8)
                .with_settings(Opaque::new(serde_json::json!({"shuffle": true}))),
        )
        .await
        .unwrap();

    // Codes are normalized to uppercase.
    assert_eq!(created.session_code, "ABC123");
    assert_eq!(created.status, SessionStatus::Waiting);
    assert_eq!(created.current_question_index, 0);
    assert!(created.started_at.is_none());

    let loaded = store.session("ABC123").await.unwrap().unwrap();
    assert_eq!(loaded, created);
}

#[tokio::test]
async fn session_without_code_gets_a_generated_one() {
    let store = store().await;

    let session = store
        .create_session(NewSession::new("Q1", "H1"))
        .await
        .unwrap();

    assert_eq!(session.session_code.len(), 6);
    assert!(
        store
            .session(&session.session_code)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn update_merges_and_stamps_lifecycle_timestamps() {
    let store = store().await;
    let code = create_abc123(&store).await;

    let updated = store
        .update_session(
            &code,
            SessionPatch {
                status: Some(SessionStatus::Active),
                current_question_index: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, SessionStatus::Active);
    assert_eq!(updated.current_question_index, 3);
    assert!(updated.started_at.is_some());

    let ended = store
        .update_session(
            &code,
            SessionPatch {
                status: Some(SessionStatus::Ended),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ended.ended_at.is_some());
    assert_eq!(ended.started_at, updated.started_at);
}

#[tokio::test]
async fn updating_an_absent_session_fails_with_not_found() {
    let store = store().await;

    let result = store
        .update_session(
            "NOPE42",
            SessionPatch {
                status: Some(SessionStatus::Active),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn score_updates_for_an_absent_session_fail_with_not_found() {
    let store = store().await;

    let result = store.update_leaderboard("NOPE42", "U1", 50).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    // Nothing was written behind the error.
    assert_eq!(store.user_rank("NOPE42", "U1").await.unwrap(), None);
    assert!(store.leaderboard("NOPE42", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn single_participant_scenario() {
    let store = store().await;
    let code = create_abc123(&store).await;

    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();
    let score = store.update_leaderboard(&code, "U1", 50).await.unwrap();
    assert_eq!(score, 50);

    let top = store.leaderboard(&code, 10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].rank, 1);
    assert_eq!(top[0].user_id, "U1");
    assert_eq!(top[0].user_name, "Alice");
    assert_eq!(top[0].score, 50);

    // The participant record eventually mirrors the counter.
    let participant = store.participant(&code, "U1").await.unwrap().unwrap();
    assert_eq!(participant.score, 50);
}

#[tokio::test]
async fn ranks_are_one_indexed_and_match_the_full_leaderboard() {
    let store = store().await;
    let code = create_abc123(&store).await;

    for (user, name, points) in [("U1", "Alice", 30), ("U2", "Bob", 80)] {
        store
            .add_participant(&code, NewParticipant::new(user, name))
            .await
            .unwrap();
        store.update_leaderboard(&code, user, points).await.unwrap();
    }

    assert_eq!(store.user_rank(&code, "U2").await.unwrap(), Some(1));
    assert_eq!(store.user_rank(&code, "U1").await.unwrap(), Some(2));
    assert_eq!(store.user_rank(&code, "U9").await.unwrap(), None);

    let full = store.leaderboard(&code, 50).await.unwrap();
    for entry in &full {
        assert_eq!(
            store.user_rank(&code, &entry.user_id).await.unwrap(),
            Some(entry.rank)
        );
    }
}

#[tokio::test]
async fn tied_scores_rank_deterministically() {
    let store = store().await;
    let code = create_abc123(&store).await;

    for user in ["U1", "U2", "U3"] {
        store
            .add_participant(&code, NewParticipant::new(user, user))
            .await
            .unwrap();
    }
    store.update_leaderboard(&code, "U1", 30).await.unwrap();
    store.update_leaderboard(&code, "U2", 80).await.unwrap();
    store.update_leaderboard(&code, "U3", 80).await.unwrap();

    let order: Vec<String> = store
        .leaderboard(&code, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.user_id)
        .collect();

    // Ties break by user id descending, the ranked-set order of the
    // distributed backend.
    assert_eq!(order, vec!["U3", "U2", "U1"]);
}

#[tokio::test]
async fn concurrent_increments_for_one_user_always_sum() {
    let store = Arc::new(store().await);
    let code = create_abc123(&store).await;
    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..40i64 {
        let store = store.clone();
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            store.update_leaderboard(&code, "U1", i).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let expected: i64 = (0..40).sum();
    let top = store.leaderboard(&code, 1).await.unwrap();
    assert_eq!(top[0].score, expected);
}

#[tokio::test]
async fn leaderboard_entries_join_answer_aggregates() {
    let store = store().await;
    let code = create_abc123(&store).await;

    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();
    store.update_leaderboard(&code, "U1", 100).await.unwrap();

    for (correct, time) in [(true, 1000), (true, 2000), (false, 3000), (true, 2000)] {
        store
            .record_answer(
                &code,
                NewAnswer::new(
                    "U1",
                    "q",
                    Opaque::new(serde_json::json!(1)),
                    correct,
                    if correct { 25 } else { 0 },
                    time,
                ),
            )
            .await
            .unwrap();
    }

    assert_eq!(store.answer_count(&code).await.unwrap(), 4);

    let entry = store.leaderboard(&code, 1).await.unwrap().remove(0);
    assert!((entry.accuracy - 0.75).abs() < f64::EPSILON);
    assert!((entry.avg_time_per_question_ms - 2000.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn delete_session_cascades_to_every_structure() {
    let store = store().await;
    let code = create_abc123(&store).await;

    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();
    store.update_leaderboard(&code, "U1", 50).await.unwrap();
    store
        .record_answer(
            &code,
            NewAnswer::new("U1", "q1", Opaque::new(serde_json::json!(2)), true, 50, 900),
        )
        .await
        .unwrap();
    store
        .cache_quiz(&code, Opaque::new(serde_json::json!({"questions": []})))
        .await
        .unwrap();

    assert!(store.delete_session(&code).await.unwrap());

    assert!(store.session(&code).await.unwrap().is_none());
    assert!(store.participants(&code).await.unwrap().is_empty());
    assert!(store.answers(&code).await.unwrap().is_empty());
    assert!(store.cached_quiz(&code).await.unwrap().is_none());
    assert!(store.leaderboard(&code, 10).await.unwrap().is_empty());
    assert!(!store.delete_session(&code).await.unwrap());
}

#[tokio::test]
async fn unreachable_candidates_fall_back_and_stay_healthy() {
    let config = StoreConfig::new()
        .with_candidate("primary", "redis://127.0.0.1:1")
        .with_candidate("secondary", "redis://127.0.0.1:2")
        .with_connect_timeout(Duration::from_millis(300));
    let store = LiveSessionStore::init(config).await;

    assert!(store.is_degraded().await);
    assert!(store.is_healthy().await);

    let code = create_abc123(&store).await;
    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();
    assert_eq!(store.update_leaderboard(&code, "U1", 10).await.unwrap(), 10);
    assert!(store.delete_session(&code).await.unwrap());

    let stats = store.backend_stats().await.unwrap();
    assert_eq!(stats.mode, BackendKind::InProcess);
    assert!(stats.degraded);

    store.shutdown().await;
}

#[tokio::test]
async fn expired_sessions_read_as_absent() {
    let config = fallback_config().with_session_ttl(Duration::from_millis(50));
    let store = LiveSessionStore::init(config).await;
    let code = create_abc123(&store).await;

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(store.session(&code).await.unwrap().is_none());
    assert!(!store.extend_ttl(&code).await.unwrap());
}

#[tokio::test]
async fn score_updates_slide_the_session_ttl_window() {
    let config = fallback_config().with_session_ttl(Duration::from_millis(100));
    let store = LiveSessionStore::init(config).await;
    let code = create_abc123(&store).await;
    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();

    // Score writes alone keep the whole tree alive past the original
    // window, same as any other write.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.update_leaderboard(&code, "U1", 10).await.unwrap();
    }

    assert!(store.session(&code).await.unwrap().is_some());
    assert_eq!(store.user_rank(&code, "U1").await.unwrap(), Some(1));

    // Once writes stop, the scores expire with the rest of the tree.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.session(&code).await.unwrap().is_none());
    assert!(store.leaderboard(&code, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn full_sessions_reject_new_joins_but_allow_rejoins() {
    let store = store().await;
    store
        .create_session(
            NewSession::new("Q1", "H1")
                .with_code("TINY01")
                .with_max_participants(1),
        )
        .await
        .unwrap();

    store
        .add_participant("TINY01", NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();

    let rejected = store
        .add_participant("TINY01", NewParticipant::new("U2", "Bob"))
        .await;
    assert!(matches!(rejected, Err(StoreError::InvalidInput(_))));

    // Re-adding the same user overwrites instead of counting anew.
    let rejoined = store
        .add_participant(
            "TINY01",
            NewParticipant::new("U1", "Alice").with_socket("sock-2"),
        )
        .await
        .unwrap();
    assert_eq!(rejoined.socket_id.as_deref(), Some("sock-2"));
    assert_eq!(store.participant_count("TINY01").await.unwrap(), 1);
}

#[tokio::test]
async fn removing_a_participant_drops_their_rank() {
    let store = store().await;
    let code = create_abc123(&store).await;

    for user in ["U1", "U2"] {
        store
            .add_participant(&code, NewParticipant::new(user, user))
            .await
            .unwrap();
        store.update_leaderboard(&code, user, 10).await.unwrap();
    }

    assert!(store.remove_participant(&code, "U2").await.unwrap());

    assert!(store.participant(&code, "U2").await.unwrap().is_none());
    assert_eq!(store.user_rank(&code, "U2").await.unwrap(), None);
    assert_eq!(store.user_rank(&code, "U1").await.unwrap(), Some(1));
}

#[tokio::test]
async fn broadcast_bus_is_a_no_op_in_fallback_mode() {
    let store = store().await;
    let code = create_abc123(&store).await;

    assert!(store.subscribe_to_session(&code).await.unwrap().is_none());
    store
        .publish_to_session(&code, "leaderboard-update", Opaque::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn current_question_scalar_roundtrips() {
    let store = store().await;
    let code = create_abc123(&store).await;

    assert_eq!(store.current_question(&code).await.unwrap(), None);
    store.set_current_question(&code, 4).await.unwrap();
    assert_eq!(store.current_question(&code).await.unwrap(), Some(4));
}

#[tokio::test]
async fn session_stats_expose_counters() {
    let store = store().await;
    let code = create_abc123(&store).await;

    store
        .add_participant(&code, NewParticipant::new("U1", "Alice"))
        .await
        .unwrap();
    store
        .record_answer(
            &code,
            NewAnswer::new("U1", "q1", Opaque::new(serde_json::json!(0)), true, 10, 800),
        )
        .await
        .unwrap();

    let stats = store.session_stats(&code).await.unwrap().unwrap();
    assert_eq!(stats.session_code, code);
    assert_eq!(stats.participant_count, 1);
    assert_eq!(stats.answer_count, 1);

    assert!(store.session_stats("NOPE42").await.unwrap().is_none());
}

#[tokio::test]
async fn cached_quiz_returns_the_payload_verbatim() {
    let store = store().await;
    let code = create_abc123(&store).await;

    let payload = Opaque::new(serde_json::json!({
        "questions": [{"id": "q1", "weird": {"nested": [1, 2, 3]}}],
        "unknown_field": null,
    }));
    store.cache_quiz(&code, payload.clone()).await.unwrap();

    assert_eq!(store.cached_quiz(&code).await.unwrap(), Some(payload));
}
