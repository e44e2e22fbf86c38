use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::one::RefMut};
use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::dao::{
    models::{AnswerEntity, Opaque, ParticipantEntity, ScoreEntry, SessionEntity, SessionEvent},
    session_store::{BackendKind, SessionBackend},
    storage::StorageResult,
};

/// Whole state tree of one session, expiring as a unit.
struct SessionTree {
    session: SessionEntity,
    participants: HashMap<String, ParticipantEntity>,
    scores: HashMap<String, i64>,
    answers: Vec<AnswerEntity>,
    quiz: Option<Opaque>,
    current_question: Option<u32>,
    expires_at: Instant,
}

impl SessionTree {
    fn new(session: SessionEntity, ttl: Duration) -> Self {
        Self {
            session,
            participants: HashMap::new(),
            scores: HashMap::new(),
            answers: Vec::new(),
            quiz: None,
            current_question: None,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Ranked entries, score descending then `user_id` descending, which is
    /// the order Redis `ZREVRANGE` produces for the same data.
    fn ranked(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = self
            .scores
            .iter()
            .map(|(user_id, score)| ScoreEntry {
                user_id: user_id.clone(),
                score: *score,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.user_id.cmp(&a.user_id))
        });
        entries
    }
}

struct MemoryInner {
    sessions: DashMap<String, SessionTree>,
    ttl: Duration,
}

/// Fallback [`SessionBackend`] holding every session tree in process
/// memory, with the same TTL semantics as the Redis backend.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    /// Build an empty store whose session trees expire after `ttl` of
    /// inactivity.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                sessions: DashMap::new(),
                ttl,
            }),
        }
    }

    /// Fetch a live session tree, removing it first when its TTL elapsed.
    ///
    /// Child writes against a code with no live tree are dropped: the
    /// orchestrator creates the session before any gameplay write, and a
    /// missing tree means the session expired or was deleted.
    fn live(&self, code: &str) -> Option<RefMut<'_, String, SessionTree>> {
        let guard = self.inner.sessions.get_mut(code)?;
        if guard.expires_at <= Instant::now() {
            drop(guard);
            self.inner.sessions.remove(code);
            return None;
        }
        Some(guard)
    }

    fn done<T>(value: T) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
    {
        Box::pin(async move { Ok(value) })
    }
}

impl SessionBackend for MemorySessionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn put_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let code = session.session_code.clone();
        let ttl = self.inner.ttl;
        match self.live(&code) {
            Some(mut tree) => {
                tree.session = session;
                tree.expires_at = Instant::now() + ttl;
            }
            None => {
                self.inner
                    .sessions
                    .insert(code, SessionTree::new(session, ttl));
            }
        }
        Self::done(())
    }

    fn get_session(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let session = self.live(code).map(|tree| tree.session.clone());
        Self::done(session)
    }

    fn delete_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = self.inner.sessions.remove(code).is_some();
        Self::done(removed)
    }

    fn touch_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let ttl = self.inner.ttl;
        let touched = match self.live(code) {
            Some(mut tree) => {
                tree.expires_at = Instant::now() + ttl;
                true
            }
            None => false,
        };
        Self::done(touched)
    }

    fn session_count(&self) -> BoxFuture<'static, StorageResult<u64>> {
        let now = Instant::now();
        let count = self
            .inner
            .sessions
            .iter()
            .filter(|tree| tree.expires_at > now)
            .count() as u64;
        Self::done(count)
    }

    fn put_participant(
        &self,
        code: &str,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut tree) = self.live(code) {
            tree.participants
                .insert(participant.user_id.clone(), participant);
        }
        Self::done(())
    }

    fn get_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let participant = self
            .live(code)
            .and_then(|tree| tree.participants.get(user_id).cloned());
        Self::done(participant)
    }

    fn all_participants(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let participants = self
            .live(code)
            .map(|tree| tree.participants.values().cloned().collect())
            .unwrap_or_default();
        Self::done(participants)
    }

    fn remove_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let removed = match self.live(code) {
            Some(mut tree) => {
                let removed = tree.participants.remove(user_id).is_some();
                tree.scores.remove(user_id);
                removed
            }
            None => false,
        };
        Self::done(removed)
    }

    fn participant_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let count = self
            .live(code)
            .map(|tree| tree.participants.len() as u64)
            .unwrap_or(0);
        Self::done(count)
    }

    fn increment_score(
        &self,
        code: &str,
        user_id: &str,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<i64>> {
        // The shard lock held by the map guard makes the read-add-write
        // a single atomic step.
        let score = match self.live(code) {
            Some(mut tree) => {
                let entry = tree.scores.entry(user_id.to_owned()).or_insert(0);
                *entry += delta;
                *entry
            }
            None => delta,
        };
        Self::done(score)
    }

    fn top_scores(
        &self,
        code: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>> {
        let mut entries = self.live(code).map(|tree| tree.ranked()).unwrap_or_default();
        entries.truncate(limit);
        Self::done(entries)
    }

    fn score_rank(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<u64>>> {
        let rank = self.live(code).and_then(|tree| {
            tree.ranked()
                .iter()
                .position(|entry| entry.user_id == user_id)
                .map(|position| position as u64)
        });
        Self::done(rank)
    }

    fn push_answer(
        &self,
        code: &str,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut tree) = self.live(code) {
            tree.answers.push(answer);
        }
        Self::done(())
    }

    fn all_answers(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let answers = self
            .live(code)
            .map(|tree| tree.answers.clone())
            .unwrap_or_default();
        Self::done(answers)
    }

    fn answer_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>> {
        let count = self
            .live(code)
            .map(|tree| tree.answers.len() as u64)
            .unwrap_or(0);
        Self::done(count)
    }

    fn put_quiz(&self, code: &str, payload: Opaque) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut tree) = self.live(code) {
            tree.quiz = Some(payload);
        }
        Self::done(())
    }

    fn get_quiz(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<Opaque>>> {
        let quiz = self.live(code).and_then(|tree| tree.quiz.clone());
        Self::done(quiz)
    }

    fn set_current_question(
        &self,
        code: &str,
        index: u32,
    ) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut tree) = self.live(code) {
            tree.current_question = Some(index);
        }
        Self::done(())
    }

    fn get_current_question(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<u32>>> {
        let index = self.live(code).and_then(|tree| tree.current_question);
        Self::done(index)
    }

    fn publish(&self, _code: &str, _event: SessionEvent) -> BoxFuture<'static, StorageResult<()>> {
        // Fallback mode has no sibling processes to notify; dropping the
        // event here is the documented single-process semantics.
        Self::done(())
    }

    fn subscribe(
        &self,
        _code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<broadcast::Receiver<SessionEvent>>>> {
        Self::done(None)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Self::done(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::dao::models::SessionStatus;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(Duration::from_secs(60))
    }

    fn session(code: &str) -> SessionEntity {
        SessionEntity {
            session_code: code.into(),
            quiz_id: "Q1".into(),
            host_id: "H1".into(),
            status: SessionStatus::Waiting,
            current_question_index: 0,
            max_participants: 50,
            settings: Opaque::default(),
            quiz_metadata: Opaque::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    fn participant(user_id: &str) -> ParticipantEntity {
        ParticipantEntity {
            user_id: user_id.into(),
            user_name: user_id.to_uppercase(),
            user_picture: None,
            score: 0,
            correct_answers: 0,
            incorrect_answers: 0,
            joined_at: Utc::now(),
            is_active: true,
            socket_id: None,
        }
    }

    #[tokio::test]
    async fn stored_session_roundtrips() {
        let store = store();
        let record = session("ABC123");
        store.put_session(record.clone()).await.unwrap();

        let loaded = store.get_session("ABC123").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn expired_session_tree_reads_as_absent() {
        let store = MemorySessionStore::new(Duration::from_millis(20));
        store.put_session(session("ABC123")).await.unwrap();
        store
            .put_participant("ABC123", participant("U1"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get_session("ABC123").await.unwrap(), None);
        assert!(store.all_participants("ABC123").await.unwrap().is_empty());
        assert!(!store.touch_session("ABC123").await.unwrap());
    }

    #[tokio::test]
    async fn touch_slides_the_expiry_window() {
        let store = MemorySessionStore::new(Duration::from_millis(80));
        store.put_session(session("ABC123")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.touch_session("ABC123").await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get_session("ABC123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_cascades_to_every_child_structure() {
        let store = store();
        store.put_session(session("ABC123")).await.unwrap();
        store
            .put_participant("ABC123", participant("U1"))
            .await
            .unwrap();
        store.increment_score("ABC123", "U1", 50).await.unwrap();
        store
            .put_quiz("ABC123", Opaque::new(serde_json::json!({"q": 1})))
            .await
            .unwrap();

        assert!(store.delete_session("ABC123").await.unwrap());

        assert_eq!(store.get_session("ABC123").await.unwrap(), None);
        assert!(store.all_participants("ABC123").await.unwrap().is_empty());
        assert!(store.top_scores("ABC123", 10).await.unwrap().is_empty());
        assert_eq!(store.get_quiz("ABC123").await.unwrap(), None);
        assert!(!store.delete_session("ABC123").await.unwrap());
    }

    #[tokio::test]
    async fn ranking_breaks_ties_by_user_id_descending() {
        let store = store();
        store.put_session(session("ABC123")).await.unwrap();
        store.increment_score("ABC123", "U1", 30).await.unwrap();
        store.increment_score("ABC123", "U2", 80).await.unwrap();
        store.increment_score("ABC123", "U3", 80).await.unwrap();

        let top = store.top_scores("ABC123", 10).await.unwrap();
        let order: Vec<&str> = top.iter().map(|entry| entry.user_id.as_str()).collect();
        // U3 and U2 are tied at 80; the higher user id ranks first, which
        // mirrors ZREVRANGE member ordering.
        assert_eq!(order, vec!["U3", "U2", "U1"]);

        assert_eq!(store.score_rank("ABC123", "U3").await.unwrap(), Some(0));
        assert_eq!(store.score_rank("ABC123", "U2").await.unwrap(), Some(1));
        assert_eq!(store.score_rank("ABC123", "U1").await.unwrap(), Some(2));
        assert_eq!(store.score_rank("ABC123", "U9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_increments_always_sum() {
        let store = store();
        store.put_session(session("ABC123")).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.increment_score("ABC123", "U1", 5).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let top = store.top_scores("ABC123", 1).await.unwrap();
        assert_eq!(top[0].score, 32 * 5);
    }

    #[tokio::test]
    async fn removing_a_participant_clears_their_score() {
        let store = store();
        store.put_session(session("ABC123")).await.unwrap();
        store
            .put_participant("ABC123", participant("U1"))
            .await
            .unwrap();
        store.increment_score("ABC123", "U1", 10).await.unwrap();

        assert!(store.remove_participant("ABC123", "U1").await.unwrap());

        assert!(store.top_scores("ABC123", 10).await.unwrap().is_empty());
        assert_eq!(store.participant_count("ABC123").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn answers_keep_append_order() {
        let store = store();
        store.put_session(session("ABC123")).await.unwrap();

        for question in ["q1", "q2", "q3"] {
            store
                .push_answer(
                    "ABC123",
                    AnswerEntity {
                        user_id: "U1".into(),
                        question_id: question.into(),
                        selected_answer: Opaque::new(serde_json::json!(0)),
                        is_correct: true,
                        points: 10,
                        answered_at: Utc::now(),
                        time_spent_ms: 1200,
                    },
                )
                .await
                .unwrap();
        }

        let answers = store.all_answers("ABC123").await.unwrap();
        let order: Vec<&str> = answers
            .iter()
            .map(|answer| answer.question_id.as_str())
            .collect();
        assert_eq!(order, vec!["q1", "q2", "q3"]);
        assert_eq!(store.answer_count("ABC123").await.unwrap(), 3);
    }
}
