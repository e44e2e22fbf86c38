//! Backend strategy for the session store.
//!
//! Every operation of the crate goes through the [`SessionBackend`] trait so
//! the active backend can be swapped atomically at runtime: Redis while the
//! cluster is reachable, the in-process store once connectivity is lost.

pub mod memory;
pub mod redis;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use crate::dao::models::{
    AnswerEntity, Opaque, ParticipantEntity, ScoreEntry, SessionEntity, SessionEvent,
};
use crate::dao::storage::StorageResult;

/// Which kind of backend is currently serving operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Redis-backed distributed mode; state is visible to sibling processes.
    Distributed,
    /// In-process fallback mode; state is local to this process.
    InProcess,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Distributed => f.write_str("distributed"),
            BackendKind::InProcess => f.write_str("in-process"),
        }
    }
}

/// Abstraction over the storage layer for one live quiz session tree.
///
/// All structures of a session share its code as namespace key; deleting a
/// session removes every child structure in the same call. Ranked-score
/// queries order entries by score descending, ties broken by `user_id`
/// descending, so ranks agree between implementations.
pub trait SessionBackend: Send + Sync {
    /// Which backend this is, used for stats and failover decisions.
    fn kind(&self) -> BackendKind;

    /// Store or replace a session record and start its TTL window.
    fn put_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch a session record by code.
    fn get_session(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Delete a session and every child structure; returns whether any
    /// state existed for the code.
    fn delete_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Slide the TTL window of the whole session tree; returns whether the
    /// session record still existed.
    fn touch_session(&self, code: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Number of live session records held by this backend.
    fn session_count(&self) -> BoxFuture<'static, StorageResult<u64>>;

    /// Store or replace a participant record, keyed by its `user_id`.
    fn put_participant(
        &self,
        code: &str,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch a single participant record.
    fn get_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Fetch every participant record of a session.
    fn all_participants(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;
    /// Remove a participant record and its leaderboard entry; returns
    /// whether the record existed.
    fn remove_participant(
        &self,
        code: &str,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Number of participant records of a session.
    fn participant_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>>;

    /// Atomically add `delta` to a participant's ranked score and return
    /// the new value. Concurrent increments never lose updates.
    fn increment_score(
        &self,
        code: &str,
        user_id: &str,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<i64>>;
    /// Top `limit` ranked entries, best first.
    fn top_scores(
        &self,
        code: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreEntry>>>;
    /// Zero-based rank of a participant in the ranked order, if present.
    fn score_rank(&self, code: &str, user_id: &str)
    -> BoxFuture<'static, StorageResult<Option<u64>>>;

    /// Append an immutable answer record.
    fn push_answer(
        &self,
        code: &str,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// All answer records of a session, in append order.
    fn all_answers(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Number of appended answers.
    fn answer_count(&self, code: &str) -> BoxFuture<'static, StorageResult<u64>>;

    /// Cache the opaque quiz payload for the session's lifetime.
    fn put_quiz(&self, code: &str, payload: Opaque) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch the cached quiz payload, if present.
    fn get_quiz(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<Opaque>>>;

    /// Store the scalar index of the question currently on screen.
    fn set_current_question(&self, code: &str, index: u32)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch the current-question scalar, if set.
    fn get_current_question(&self, code: &str) -> BoxFuture<'static, StorageResult<Option<u32>>>;

    /// Fan an event out to every process subscribed to the session channel.
    /// A documented no-op in fallback mode.
    fn publish(&self, code: &str, event: SessionEvent) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to the session channel. Returns `None` in fallback mode,
    /// where cross-process fan-out is unavailable.
    fn subscribe(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<broadcast::Receiver<SessionEvent>>>>;

    /// Probe whether the backend is serviceable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
